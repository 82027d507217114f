// src/syscalls.rs
use core::fmt::{self, Write};
use log::info;
use crate::config::{MAX_PRINT_LEN, SYS_USER_BASE};
use crate::process::{Dispatch, FatalError, ProcessScheduler};
use crate::symbols::SymbolTable;

/// System call numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum SyscallNumber {
    Print = SYS_USER_BASE,
    Exit = SYS_USER_BASE + 1,
    PrintBacktrace = SYS_USER_BASE + 2,
}

impl TryFrom<u64> for SyscallNumber {
    type Error = u64;

    fn try_from(number: u64) -> Result<Self, u64> {
        match number {
            n if n == SyscallNumber::Print as u64 => Ok(SyscallNumber::Print),
            n if n == SyscallNumber::Exit as u64 => Ok(SyscallNumber::Exit),
            n if n == SyscallNumber::PrintBacktrace as u64 => Ok(SyscallNumber::PrintBacktrace),
            other => Err(other),
        }
    }
}

/// System call arguments, a1 through a7 (a0 carries the number)
#[derive(Debug, Default, Clone, Copy)]
pub struct SyscallArgs {
    pub arg1: u64,
    pub arg2: u64,
    pub arg3: u64,
    pub arg4: u64,
    pub arg5: u64,
    pub arg6: u64,
    pub arg7: u64,
}

/// System call errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    BadAddress,
    InvalidArgument,
    NoCurrentProcess,
}

impl SyscallError {
    pub fn errno(self) -> i64 {
        match self {
            SyscallError::NoCurrentProcess => 3,
            SyscallError::BadAddress => 14,
            SyscallError::InvalidArgument => 22,
        }
    }
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyscallError::BadAddress => write!(f, "Bad user address"),
            SyscallError::InvalidArgument => write!(f, "Invalid argument"),
            SyscallError::NoCurrentProcess => write!(f, "No current process"),
        }
    }
}

/// System call result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallResult {
    Success(i64),
    Error(SyscallError),
    /// The caller gave up the CPU; carry out the scheduling decision.
    Dispatch(Dispatch),
}

impl SyscallResult {
    /// Value for the return register, if the caller resumes.
    pub fn code(&self) -> Option<i64> {
        match self {
            SyscallResult::Success(value) => Some(*value),
            SyscallResult::Error(err) => Some(-err.errno()),
            SyscallResult::Dispatch(_) => None,
        }
    }
}

impl From<Result<i64, SyscallError>> for SyscallResult {
    fn from(result: Result<i64, SyscallError>) -> Self {
        match result {
            Ok(value) => SyscallResult::Success(value),
            Err(err) => SyscallResult::Error(err),
        }
    }
}

/// Read access to the calling process's address space.
pub trait UserMemory {
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), SyscallError>;

    fn read_u64(&self, addr: u64) -> Result<u64, SyscallError> {
        let mut bytes = [0u8; 8];
        self.read(addr, &mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }
}

/// Everything a syscall handler may touch.
pub struct SyscallContext<'a> {
    pub scheduler: &'a mut ProcessScheduler,
    pub memory: &'a dyn UserMemory,
    pub symbols: &'a SymbolTable,
    pub console: &'a mut dyn Write,
}

/// Handle a system call
pub fn do_syscall(ctx: &mut SyscallContext, number: u64, args: SyscallArgs) -> SyscallResult {
    match SyscallNumber::try_from(number) {
        Ok(SyscallNumber::Print) => sys_user_print(ctx, args.arg1, args.arg2).into(),
        Ok(SyscallNumber::Exit) => sys_user_exit(ctx, args.arg1),
        Ok(SyscallNumber::PrintBacktrace) => sys_user_print_backtrace(ctx, args.arg1).into(),
        Err(unknown) => SyscallResult::Dispatch(Dispatch::Fatal(FatalError::UnknownSyscall(unknown))),
    }
}

/// Write `len` bytes of user memory to the console, stopping at the first NUL.
///
/// The string is copied in `MAX_PRINT_LEN` chunks. A character split across
/// two chunks is held back and finished by the next one. Chunks already
/// written stay on the console if a later one turns out not to be UTF-8.
pub fn sys_user_print(ctx: &mut SyscallContext, addr: u64, len: u64) -> Result<i64, SyscallError> {
    let mut buf = [0u8; MAX_PRINT_LEN];
    let mut carry = 0usize;
    let mut offset = 0u64;

    while offset < len {
        let take = (len - offset).min((MAX_PRINT_LEN - carry) as u64) as usize;
        let filled = carry + take;
        ctx.memory.read(addr.wrapping_add(offset), &mut buf[carry..filled])?;
        offset += take as u64;

        let (end, at_nul) = match buf[carry..filled].iter().position(|&b| b == 0) {
            Some(n) => (carry + n, true),
            None => (filled, false),
        };
        let valid = match core::str::from_utf8(&buf[..end]) {
            Ok(text) => text.len(),
            Err(err) if err.error_len().is_none() && !at_nul && offset < len => err.valid_up_to(),
            Err(_) => return Err(SyscallError::InvalidArgument),
        };
        let text = core::str::from_utf8(&buf[..valid]).map_err(|_| SyscallError::InvalidArgument)?;
        ctx.console.write_str(text).ok();

        if at_nul {
            break;
        }
        buf.copy_within(valid..end, 0);
        carry = end - valid;
    }
    Ok(0)
}

/// Retire the calling process and pick the next one.
pub fn sys_user_exit(ctx: &mut SyscallContext, code: u64) -> SyscallResult {
    let code = code as i32;
    info!("User exit with code: {}", code);
    ctx.scheduler.exit_current(code);
    SyscallResult::Dispatch(ctx.scheduler.schedule())
}

/// Print the names of up to `frames` callers, innermost first, stopping at `main`.
///
/// Frames follow the RISC-V layout: the return address sits at `fp - 8`
/// and the caller's frame pointer at `fp - 16`.
pub fn sys_user_print_backtrace(ctx: &mut SyscallContext, frames: u64) -> Result<i64, SyscallError> {
    let pid = ctx.scheduler.current().ok_or(SyscallError::NoCurrentProcess)?;
    let fp = ctx
        .scheduler
        .process(pid)
        .map_err(|_| SyscallError::NoCurrentProcess)?
        .trapframe
        .fp;

    // The trap frame belongs to the syscall wrapper; skip it.
    let mut cur_fp = ctx.memory.read_u64(fp.wrapping_sub(8))?;
    for _ in 0..frames {
        if print_frame(ctx, cur_fp)? {
            break;
        }
        cur_fp = ctx.memory.read_u64(cur_fp.wrapping_sub(16))?;
    }
    Ok(0)
}

/// Print the function a frame returns into. True once that function is `main`.
fn print_frame(ctx: &mut SyscallContext, fp: u64) -> Result<bool, SyscallError> {
    let ret_addr = ctx.memory.read_u64(fp.wrapping_sub(8))?;
    match ctx.symbols.lookup(ret_addr) {
        Some(sym) => {
            writeln!(ctx.console, "{}", sym.name()).ok();
            Ok(sym.name() == "main")
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{Pid, ProcessState, TrapFrame};
    use crate::symbols::Symbol;

    /// One contiguous region of user memory.
    struct FakeMemory {
        base: u64,
        bytes: Vec<u8>,
    }

    impl FakeMemory {
        fn new(base: u64, size: usize) -> Self {
            Self { base, bytes: vec![0; size] }
        }

        fn put(&mut self, addr: u64, data: &[u8]) {
            let off = (addr - self.base) as usize;
            self.bytes[off..off + data.len()].copy_from_slice(data);
        }

        fn put_u64(&mut self, addr: u64, value: u64) {
            self.put(addr, &value.to_le_bytes());
        }
    }

    impl UserMemory for FakeMemory {
        fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), SyscallError> {
            let off = addr.checked_sub(self.base).ok_or(SyscallError::BadAddress)? as usize;
            let src = self.bytes.get(off..off + buf.len()).ok_or(SyscallError::BadAddress)?;
            buf.copy_from_slice(src);
            Ok(())
        }
    }

    fn symbols() -> SymbolTable {
        let mut table = SymbolTable::new();
        table.push(Symbol::new("main", 0x1000, 0x40));
        table.push(Symbol::new("do_work", 0x1040, 0x20));
        table.push(Symbol::new("helper", 0x1060, 0x20));
        table
    }

    fn running(fp: u64) -> (ProcessScheduler, Pid) {
        let mut sched = ProcessScheduler::new();
        let pid = sched.spawn(None, TrapFrame { fp, ..Default::default() }).unwrap();
        sched.schedule();
        (sched, pid)
    }

    /// Stack with wrapper frame at 0x9000 calling helper <- do_work <- main <- start.
    fn stack() -> FakeMemory {
        let mut mem = FakeMemory::new(0x8e00, 0x200);
        mem.put_u64(0x9000 - 8, 0x8f00);
        mem.put_u64(0x8f00 - 8, 0x1064); // helper
        mem.put_u64(0x8f00 - 16, 0x8f40);
        mem.put_u64(0x8f40 - 8, 0x1048); // do_work
        mem.put_u64(0x8f40 - 16, 0x8f80);
        mem.put_u64(0x8f80 - 8, 0x1010); // main
        mem.put_u64(0x8f80 - 16, 0x8fc0);
        mem.put_u64(0x8fc0 - 8, 0x1010);
        mem
    }

    fn call(
        sched: &mut ProcessScheduler,
        mem: &FakeMemory,
        number: u64,
        args: SyscallArgs,
    ) -> (SyscallResult, String) {
        let table = symbols();
        let mut console = String::new();
        let mut ctx = SyscallContext {
            scheduler: sched,
            memory: mem,
            symbols: &table,
            console: &mut console,
        };
        let result = do_syscall(&mut ctx, number, args);
        (result, console)
    }

    #[test]
    fn syscall_numbers_start_at_user_base() {
        assert_eq!(SyscallNumber::try_from(64), Ok(SyscallNumber::Print));
        assert_eq!(SyscallNumber::try_from(65), Ok(SyscallNumber::Exit));
        assert_eq!(SyscallNumber::try_from(66), Ok(SyscallNumber::PrintBacktrace));
        assert_eq!(SyscallNumber::try_from(67), Err(67));
    }

    #[test]
    fn print_writes_up_to_nul() {
        let (mut sched, _) = running(0);
        let mut mem = FakeMemory::new(0x4000, 0x100);
        mem.put(0x4000, b"Hello world!\n\0garbage");

        let args = SyscallArgs { arg1: 0x4000, arg2: 22, ..Default::default() };
        let (result, console) = call(&mut sched, &mem, SyscallNumber::Print as u64, args);
        assert_eq!(result, SyscallResult::Success(0));
        assert_eq!(console, "Hello world!\n");
    }

    #[test]
    fn print_from_bad_address_fails() {
        let (mut sched, _) = running(0);
        let mem = FakeMemory::new(0x4000, 0x10);
        let args = SyscallArgs { arg1: 0x5000, arg2: 4, ..Default::default() };
        let (result, console) = call(&mut sched, &mem, SyscallNumber::Print as u64, args);
        assert_eq!(result, SyscallResult::Error(SyscallError::BadAddress));
        assert_eq!(result.code(), Some(-14));
        assert!(console.is_empty());
    }

    #[test]
    fn print_rejects_invalid_utf8() {
        let (mut sched, _) = running(0);
        let mut mem = FakeMemory::new(0x4000, 0x10);
        mem.put(0x4000, &[0xff, 0xfe]);
        let args = SyscallArgs { arg1: 0x4000, arg2: 2, ..Default::default() };
        let (result, _) = call(&mut sched, &mem, SyscallNumber::Print as u64, args);
        assert_eq!(result, SyscallResult::Error(SyscallError::InvalidArgument));
    }

    #[test]
    fn print_writes_messages_longer_than_one_chunk() {
        let (mut sched, _) = running(0);
        let mut mem = FakeMemory::new(0x4000, 0x400);
        mem.put(0x4000, &[b'x'; 400]);
        let args = SyscallArgs { arg1: 0x4000, arg2: 400, ..Default::default() };
        let (result, console) = call(&mut sched, &mem, SyscallNumber::Print as u64, args);
        assert_eq!(result, SyscallResult::Success(0));
        assert_eq!(console.len(), 400);
        assert!(console.bytes().all(|b| b == b'x'));
    }

    #[test]
    fn print_keeps_character_split_at_chunk_edge() {
        let (mut sched, _) = running(0);
        let mut mem = FakeMemory::new(0x4000, 0x400);
        let mut message = "a".repeat(MAX_PRINT_LEN - 1);
        message.push_str("\u{e9} tail");
        mem.put(0x4000, message.as_bytes());
        let args = SyscallArgs { arg1: 0x4000, arg2: message.len() as u64, ..Default::default() };
        let (result, console) = call(&mut sched, &mem, SyscallNumber::Print as u64, args);
        assert_eq!(result, SyscallResult::Success(0));
        assert_eq!(console, message);
    }

    #[test]
    fn print_stops_at_nul_in_later_chunk() {
        let (mut sched, _) = running(0);
        let mut mem = FakeMemory::new(0x4000, 0x400);
        mem.put(0x4000, &[b'b'; 300]);
        mem.put(0x4000 + 300, b"\0junk");
        let args = SyscallArgs { arg1: 0x4000, arg2: 305, ..Default::default() };
        let (result, console) = call(&mut sched, &mem, SyscallNumber::Print as u64, args);
        assert_eq!(result, SyscallResult::Success(0));
        assert_eq!(console, "b".repeat(300));
    }

    #[test]
    fn print_rejects_invalid_utf8_in_later_chunk() {
        let (mut sched, _) = running(0);
        let mut mem = FakeMemory::new(0x4000, 0x400);
        mem.put(0x4000, &[b'c'; 300]);
        mem.put(0x4000 + 300, &[0xff]);
        let args = SyscallArgs { arg1: 0x4000, arg2: 301, ..Default::default() };
        let (result, console) = call(&mut sched, &mem, SyscallNumber::Print as u64, args);
        assert_eq!(result, SyscallResult::Error(SyscallError::InvalidArgument));
        assert_eq!(console.len(), MAX_PRINT_LEN);
    }

    #[test]
    fn print_rejects_character_cut_by_length() {
        let (mut sched, _) = running(0);
        let mut mem = FakeMemory::new(0x4000, 0x10);
        mem.put(0x4000, "\u{e9}".as_bytes());
        let args = SyscallArgs { arg1: 0x4000, arg2: 1, ..Default::default() };
        let (result, _) = call(&mut sched, &mem, SyscallNumber::Print as u64, args);
        assert_eq!(result, SyscallResult::Error(SyscallError::InvalidArgument));
    }

    #[test]
    fn exit_code_is_logged_and_stored_as_the_same_value() {
        let (mut sched, pid) = running(0);
        let mem = FakeMemory::new(0, 0);
        let args = SyscallArgs { arg1: 0x1_0000_0007, ..Default::default() };
        call(&mut sched, &mem, SyscallNumber::Exit as u64, args);
        assert_eq!(sched.process(pid).unwrap().exit_code, Some(7));

        let (mut sched, pid) = running(0);
        let args = SyscallArgs { arg1: u64::MAX, ..Default::default() };
        call(&mut sched, &mem, SyscallNumber::Exit as u64, args);
        assert_eq!(sched.process(pid).unwrap().exit_code, Some(-1));
    }

    #[test]
    fn exit_of_last_process_shuts_down() {
        let (mut sched, pid) = running(0);
        let mem = FakeMemory::new(0, 0);
        let args = SyscallArgs { arg1: 5, ..Default::default() };
        let (result, _) = call(&mut sched, &mem, SyscallNumber::Exit as u64, args);

        assert_eq!(result, SyscallResult::Dispatch(Dispatch::Shutdown(0)));
        assert_eq!(result.code(), None);
        let proc = sched.process(pid).unwrap();
        assert_eq!(proc.state, ProcessState::Zombie);
        assert_eq!(proc.exit_code, Some(5));
    }

    #[test]
    fn exit_of_child_resumes_waiting_parent() {
        let mut sched = ProcessScheduler::new();
        let parent = sched.spawn(None, TrapFrame::default()).unwrap();
        sched.schedule();
        let child = sched.spawn(Some(parent), TrapFrame { pc: 0x2000, ..Default::default() }).unwrap();
        sched.block_current();
        sched.schedule();
        assert_eq!(sched.current(), Some(child));

        let mem = FakeMemory::new(0, 0);
        let (result, _) = call(&mut sched, &mem, SyscallNumber::Exit as u64, SyscallArgs::default());
        assert_eq!(
            result,
            SyscallResult::Dispatch(Dispatch::Run { pid: parent, trapframe: TrapFrame::default() })
        );
    }

    #[test]
    fn backtrace_stops_at_main() {
        let (mut sched, _) = running(0x9000);
        let mem = stack();
        let args = SyscallArgs { arg1: 10, ..Default::default() };
        let (result, console) = call(&mut sched, &mem, SyscallNumber::PrintBacktrace as u64, args);
        assert_eq!(result, SyscallResult::Success(0));
        assert_eq!(console, "helper\ndo_work\nmain\n");
    }

    #[test]
    fn backtrace_honours_frame_count() {
        let (mut sched, _) = running(0x9000);
        let mem = stack();
        let args = SyscallArgs { arg1: 2, ..Default::default() };
        let (_, console) = call(&mut sched, &mem, SyscallNumber::PrintBacktrace as u64, args);
        assert_eq!(console, "helper\ndo_work\n");
    }

    #[test]
    fn backtrace_skips_unknown_frames() {
        let (mut sched, _) = running(0x9000);
        let mut mem = stack();
        mem.put_u64(0x8f40 - 8, 0x7777);
        let args = SyscallArgs { arg1: 10, ..Default::default() };
        let (_, console) = call(&mut sched, &mem, SyscallNumber::PrintBacktrace as u64, args);
        assert_eq!(console, "helper\nmain\n");
    }

    #[test]
    fn backtrace_without_current_process() {
        let mut sched = ProcessScheduler::new();
        let mem = stack();
        let args = SyscallArgs { arg1: 1, ..Default::default() };
        let (result, _) = call(&mut sched, &mem, SyscallNumber::PrintBacktrace as u64, args);
        assert_eq!(result, SyscallResult::Error(SyscallError::NoCurrentProcess));
    }

    #[test]
    fn backtrace_off_the_stack_is_bad_address() {
        let (mut sched, _) = running(0x100);
        let mem = stack();
        let args = SyscallArgs { arg1: 1, ..Default::default() };
        let (result, _) = call(&mut sched, &mem, SyscallNumber::PrintBacktrace as u64, args);
        assert_eq!(result, SyscallResult::Error(SyscallError::BadAddress));
    }

    #[test]
    fn unknown_syscall_is_fatal() {
        let mut sched = ProcessScheduler::new();
        let mem = FakeMemory::new(0, 0);
        let (result, _) = call(&mut sched, &mem, 3, SyscallArgs::default());
        assert_eq!(result, SyscallResult::Dispatch(Dispatch::Fatal(FatalError::UnknownSyscall(3))));
        assert_eq!(sched.get_stats().current_process, None);
    }
}
