// Process Control Block and process table for the ksched kernel
use core::fmt;
use crate::config::NPROC;

/// Process ID type. A pid is the index of the process's slot in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub usize);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Free,    // Slot unused
    Ready,   // Waiting in the ready queue
    Running, // Currently executing
    Blocked, // Waiting in the blocked queue for its child
    Zombie,  // Exited, slot not yet reclaimed
}

impl ProcessState {
    /// `Free` and `Zombie` processes need no more scheduling.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Free | ProcessState::Zombie)
    }
}

/// The two run queues a process can be threaded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Ready,
    Blocked,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueueKind::Ready => write!(f, "ready"),
            QueueKind::Blocked => write!(f, "blocked"),
        }
    }
}

/// Where a process sits in the run queues.
///
/// `queue` names the one queue the process is linked into, `next` is its
/// successor there. Both are only written by the queue operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueLink {
    pub queue: Option<QueueKind>,
    pub next: Option<Pid>,
}

/// Saved user context handed to the context switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrapFrame {
    pub pc: u64, // Resume address
    pub sp: u64, // Stack pointer
    pub fp: u64, // Frame pointer (s0 / rbp)
}

/// Process Control Block
#[derive(Debug, Clone, Copy)]
pub struct Process {
    pub pid: Pid,
    pub state: ProcessState,
    pub parent: Option<Pid>,
    pub link: QueueLink,
    pub trapframe: TrapFrame,
    pub exit_code: Option<i32>,
}

impl Process {
    const fn free(slot: usize) -> Self {
        Self {
            pid: Pid(slot),
            state: ProcessState::Free,
            parent: None,
            link: QueueLink { queue: None, next: None },
            trapframe: TrapFrame { pc: 0, sp: 0, fp: 0 },
            exit_code: None,
        }
    }
}

/// Process management errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    TableFull,
    InvalidPid(Pid),
    NotZombie(Pid),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProcessError::TableFull => write!(f, "Process table is full"),
            ProcessError::InvalidPid(pid) => write!(f, "Invalid process ID {}", pid),
            ProcessError::NotZombie(pid) => write!(f, "Process {} is not a zombie", pid),
        }
    }
}

/// Fixed-capacity process table, the ground truth for process liveness.
pub struct ProcessTable {
    procs: [Process; NPROC],
}

impl ProcessTable {
    pub fn new() -> Self {
        let mut procs = [Process::free(0); NPROC];
        for (slot, proc) in procs.iter_mut().enumerate() {
            proc.pid = Pid(slot);
        }
        Self { procs }
    }

    pub fn capacity(&self) -> usize {
        self.procs.len()
    }

    pub fn get(&self, pid: Pid) -> Result<&Process, ProcessError> {
        self.procs.get(pid.0).ok_or(ProcessError::InvalidPid(pid))
    }

    pub fn get_mut(&mut self, pid: Pid) -> Result<&mut Process, ProcessError> {
        self.procs.get_mut(pid.0).ok_or(ProcessError::InvalidPid(pid))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.procs.iter()
    }

    /// Claim the first `Free` slot for a new process of `parent`.
    ///
    /// The record is reset but stays `Free` until the caller queues it.
    pub fn alloc(&mut self, parent: Option<Pid>) -> Result<Pid, ProcessError> {
        let proc = self
            .procs
            .iter_mut()
            .find(|p| p.state == ProcessState::Free && p.link.queue.is_none())
            .ok_or(ProcessError::TableFull)?;
        let pid = proc.pid;
        *proc = Process::free(pid.0);
        proc.parent = parent;
        Ok(pid)
    }

    /// Return a `Zombie` slot to the free pool.
    pub fn reap(&mut self, pid: Pid) -> Result<i32, ProcessError> {
        let proc = self.get_mut(pid)?;
        if proc.state != ProcessState::Zombie {
            return Err(ProcessError::NotZombie(pid));
        }
        let code = proc.exit_code.unwrap_or(0);
        *proc = Process::free(pid.0);
        Ok(code)
    }

    /// True when every slot is `Free` or `Zombie`.
    pub fn all_terminal(&self) -> bool {
        self.procs.iter().all(|p| p.state.is_terminal())
    }

    /// Processes that are still of interest to the kernel.
    pub fn live(&self) -> impl Iterator<Item = &Process> {
        self.procs.iter().filter(|p| !p.state.is_terminal())
    }

    pub(crate) fn slot(&self, pid: Pid) -> &Process {
        match self.procs.get(pid.0) {
            Some(proc) => proc,
            None => panic!("pid {} outside the process table", pid),
        }
    }

    pub(crate) fn slot_mut(&mut self, pid: Pid) -> &mut Process {
        match self.procs.get_mut(pid.0) {
            Some(proc) => proc,
            None => panic!("pid {} outside the process table", pid),
        }
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
