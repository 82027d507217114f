// Process management for the ksched kernel
pub mod pcb;
pub mod queue;
pub mod scheduler;
pub mod context;

pub use pcb::{Pid, Process, ProcessError, ProcessState, ProcessTable, QueueKind, QueueLink, TrapFrame};
pub use queue::{QueueIter, RunQueues};
pub use scheduler::{ProcessScheduler, SchedulerStats};
pub use context::{Dispatch, FatalError, Machine};
