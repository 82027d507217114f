// Context switching boundary for the ksched kernel
use core::fmt;
use crate::process::pcb::{Pid, ProcessState, TrapFrame};

/// Conditions that halt the kernel abnormally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// The head of the ready queue was not in `Ready` state.
    NotReady { pid: Pid, state: ProcessState },
    /// Nothing is ready, yet `pid` is neither free nor a zombie.
    UnfinishedProcesses { pid: Pid, state: ProcessState },
    UnknownSyscall(u64),
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FatalError::NotReady { pid, state } => {
                write!(f, "dispatching process {} in state {:?}, expected Ready", pid, state)
            }
            FatalError::UnfinishedProcesses { pid, state } => write!(
                f,
                "Not handled: we should let system wait for unfinished processes (process {} is {:?})",
                pid, state
            ),
            FatalError::UnknownSyscall(number) => write!(f, "Unknown syscall {}", number),
        }
    }
}

/// Primitives the scheduler hands control to. None of them return.
pub trait Machine {
    /// Resume `pid` from its saved trap frame.
    fn switch_to(&mut self, pid: Pid, frame: &TrapFrame) -> !;

    /// Power the system off with `code`.
    fn shutdown(&mut self, code: i32) -> !;

    /// Halt the system after reporting `error`.
    fn fatal(&mut self, error: &FatalError) -> !;
}

/// Outcome of a scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Run { pid: Pid, trapframe: TrapFrame },
    Shutdown(i32),
    Fatal(FatalError),
}

impl Dispatch {
    /// Carry out the decision on `machine`.
    pub fn perform<M: Machine>(self, machine: &mut M) -> ! {
        match self {
            Dispatch::Run { pid, trapframe } => machine.switch_to(pid, &trapframe),
            Dispatch::Shutdown(code) => machine.shutdown(code),
            Dispatch::Fatal(error) => machine.fatal(&error),
        }
    }
}
