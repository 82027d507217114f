#![no_std]
#![no_main]

use bootloader::{entry_point, BootInfo};
use core::panic::PanicInfo;
use lazy_static::lazy_static;
use log::LevelFilter;
use spin::Mutex;

use ksched::process::{Pid, ProcessScheduler, TrapFrame};
use ksched::qemu::{exit_qemu, QemuExitCode, QemuMachine};
use ksched::serial::SerialConsole;
use ksched::serial_println;
use ksched::symbols::SymbolTable;
use ksched::syscalls::{
    do_syscall, SyscallArgs, SyscallContext, SyscallError, SyscallNumber, SyscallResult, UserMemory,
};

entry_point!(kernel_main);

type Entry = extern "C" fn() -> !;

lazy_static! {
    static ref SCHEDULER: Mutex<ProcessScheduler> = Mutex::new(ProcessScheduler::new());
}

// The demo processes are kernel functions linked into this image, not
// loaded ELF programs, so there is no `.symtab` to pass to
// `SymbolTable::from_elf` and no RISC-V frame chain to walk. The table
// stays empty and none of them asks for a backtrace.
static SYMBOLS: SymbolTable = SymbolTable::new();

/// Demo processes share the kernel's address space.
struct KernelMemory;

impl UserMemory for KernelMemory {
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), SyscallError> {
        if addr == 0 {
            return Err(SyscallError::BadAddress);
        }
        unsafe {
            core::ptr::copy_nonoverlapping(addr as *const u8, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }
}

fn kernel_main(_boot_info: &'static BootInfo) -> ! {
    if ksched::logger::init(LevelFilter::Info).is_err() {
        serial_println!("logger already installed");
    }
    serial_println!("Welcome to ksched!");

    {
        let mut scheduler = SCHEDULER.lock();
        for entry in [init_main as Entry, hello_main as Entry] {
            if let Err(err) = scheduler.spawn(None, frame_for(entry)) {
                serial_println!("failed to create process: {}", err);
            }
        }
    }

    let dispatch = SCHEDULER.lock().schedule();
    dispatch.perform(&mut QemuMachine)
}

fn frame_for(entry: Entry) -> TrapFrame {
    TrapFrame {
        pc: entry as usize as u64,
        ..Default::default()
    }
}

/// Trap into the syscall table. Calls that give up the CPU never return.
fn syscall(number: SyscallNumber, args: SyscallArgs) -> i64 {
    let result = {
        let mut scheduler = SCHEDULER.lock();
        let mut console = SerialConsole;
        let mut ctx = SyscallContext {
            scheduler: &mut *scheduler,
            memory: &KernelMemory,
            symbols: &SYMBOLS,
            console: &mut console,
        };
        do_syscall(&mut ctx, number as u64, args)
    };

    match result {
        SyscallResult::Dispatch(dispatch) => dispatch.perform(&mut QemuMachine),
        other => other.code().unwrap_or(0),
    }
}

fn user_print(text: &str) {
    let args = SyscallArgs {
        arg1: text.as_ptr() as u64,
        arg2: text.len() as u64,
        ..Default::default()
    };
    syscall(SyscallNumber::Print, args);
}

fn user_exit(code: i32) -> ! {
    let args = SyscallArgs {
        arg1: code as u64,
        ..Default::default()
    };
    syscall(SyscallNumber::Exit, args);
    ksched::hlt_loop()
}

/// Start a child of the running process.
fn spawn_child(entry: Entry) -> Option<Pid> {
    let mut scheduler = SCHEDULER.lock();
    let parent = scheduler.current();
    scheduler.spawn(parent, frame_for(entry)).ok()
}

/// Block until a child exits, then continue at `resume`.
fn wait_for_child(resume: Entry) -> ! {
    let dispatch = {
        let mut scheduler = SCHEDULER.lock();
        if let Some(pid) = scheduler.current() {
            scheduler.save_context(pid, frame_for(resume)).ok();
        }
        scheduler.block_current();
        scheduler.schedule()
    };
    dispatch.perform(&mut QemuMachine)
}

extern "C" fn init_main() -> ! {
    user_print("init: starting worker\n");
    if spawn_child(worker_main).is_none() {
        user_print("init: no free process slot\n");
        user_exit(1);
    }
    wait_for_child(init_after_wait)
}

extern "C" fn init_after_wait() -> ! {
    user_print("init: worker finished\n");
    user_exit(0)
}

extern "C" fn worker_main() -> ! {
    user_print("worker: hello from the child\n");
    user_exit(0)
}

extern "C" fn hello_main() -> ! {
    user_print("hello: independent process\n");
    user_exit(0)
}

/// This function is called on panic.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("[panic] {}", info);
    exit_qemu(QemuExitCode::Failed);
    ksched::hlt_loop()
}
