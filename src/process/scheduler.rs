// Process Scheduler for the ksched kernel
//
// First-come-first-served and non-preemptive: a process runs until it exits,
// blocks or yields, and the caller re-queues it before asking for the next one.
use log::{info, warn};
use crate::process::context::{Dispatch, FatalError};
use crate::process::pcb::{Pid, Process, ProcessError, ProcessState, ProcessTable, QueueKind, TrapFrame};
use crate::process::queue::RunQueues;

/// Owns the process table, both run queues and the running process.
pub struct ProcessScheduler {
    table: ProcessTable,
    queues: RunQueues,
    current: Option<Pid>,
}

impl ProcessScheduler {
    /// Empty queues, every slot `Free`, nothing running.
    pub fn new() -> Self {
        Self {
            table: ProcessTable::new(),
            queues: RunQueues::new(),
            current: None,
        }
    }

    pub fn insert_ready(&mut self, pid: Pid) {
        self.queues.insert_ready(&mut self.table, pid);
    }

    pub fn insert_blocked(&mut self, pid: Option<Pid>) {
        self.queues.insert_blocked(&mut self.table, pid);
    }

    pub fn wake_parent_of(&mut self, child: Pid) {
        self.queues.wake_parent_of(&mut self.table, child);
    }

    /// Create a process and make it ready.
    pub fn spawn(&mut self, parent: Option<Pid>, trapframe: TrapFrame) -> Result<Pid, ProcessError> {
        let pid = self.table.alloc(parent)?;
        self.table.slot_mut(pid).trapframe = trapframe;
        self.insert_ready(pid);
        Ok(pid)
    }

    /// Put the running process back at the tail of the ready queue.
    pub fn yield_current(&mut self) {
        if let Some(pid) = self.current.take() {
            self.insert_ready(pid);
        }
    }

    /// Park the running process until one of its children exits.
    pub fn block_current(&mut self) {
        let pid = self.current.take();
        self.insert_blocked(pid);
    }

    /// Turn the running process into a zombie and wake its parent.
    pub fn exit_current(&mut self, code: i32) -> Option<Pid> {
        let pid = self.current.take()?;
        let proc = self.table.slot_mut(pid);
        proc.state = ProcessState::Zombie;
        proc.exit_code = Some(code);
        self.wake_parent_of(pid);
        Some(pid)
    }

    /// Record where `pid` resumes the next time it is dispatched.
    pub fn save_context(&mut self, pid: Pid, trapframe: TrapFrame) -> Result<(), ProcessError> {
        self.table.get_mut(pid)?.trapframe = trapframe;
        Ok(())
    }

    /// Reclaim an exited process's slot, returning its exit code.
    pub fn reap(&mut self, pid: Pid) -> Result<i32, ProcessError> {
        self.table.reap(pid)
    }

    /// Pick the next process to run.
    ///
    /// Whatever was running must already have been re-queued or retired.
    pub fn schedule(&mut self) -> Dispatch {
        let pid = match self.queues.pop_ready(&mut self.table) {
            Some(pid) => pid,
            None => return self.idle(),
        };
        let proc = self.table.slot_mut(pid);
        if proc.state != ProcessState::Ready {
            return Dispatch::Fatal(FatalError::NotReady { pid, state: proc.state });
        }

        proc.state = ProcessState::Running;
        let trapframe = proc.trapframe;
        self.current = Some(pid);
        info!("going to schedule process {} to run", pid);
        Dispatch::Run { pid, trapframe }
    }

    /// Nothing is ready: either every process is done or we are stuck.
    fn idle(&self) -> Dispatch {
        let mut stuck = None;
        for proc in self.table.live() {
            warn!(
                "ready queue empty, but process {} is not in free/zombie state: {:?}",
                proc.pid, proc.state
            );
            if stuck.is_none() {
                stuck = Some(FatalError::UnfinishedProcesses { pid: proc.pid, state: proc.state });
            }
        }

        match stuck {
            None => {
                info!("no more ready processes, system shutdown now");
                Dispatch::Shutdown(0)
            }
            Some(error) => Dispatch::Fatal(error),
        }
    }

    pub fn current(&self) -> Option<Pid> {
        self.current
    }

    pub fn process(&self, pid: Pid) -> Result<&Process, ProcessError> {
        self.table.get(pid)
    }

    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    pub fn ready_pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.queues.iter(&self.table, QueueKind::Ready)
    }

    pub fn blocked_pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.queues.iter(&self.table, QueueKind::Blocked)
    }

    /// Scheduler statistics
    pub fn get_stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats {
            current_process: self.current,
            ..Default::default()
        };
        for proc in self.table.iter() {
            match proc.state {
                ProcessState::Free => stats.free += 1,
                ProcessState::Ready => stats.ready += 1,
                ProcessState::Running => stats.running += 1,
                ProcessState::Blocked => stats.blocked += 1,
                ProcessState::Zombie => stats.zombie += 1,
            }
        }
        stats
    }
}

impl Default for ProcessScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduler statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub current_process: Option<Pid>,
    pub free: usize,
    pub ready: usize,
    pub running: usize,
    pub blocked: usize,
    pub zombie: usize,
}
