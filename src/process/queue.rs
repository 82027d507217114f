// Ready and blocked run queues for the ksched kernel
//
// Both queues are singly linked through the process records themselves:
// a queue is only a head pid, and each process carries its successor in
// `Process::link`. Nothing is allocated.
use log::debug;
use crate::process::pcb::{Pid, ProcessState, ProcessTable, QueueKind};

/// Heads of the ready and blocked queues.
#[derive(Debug, Default)]
pub struct RunQueues {
    ready: Option<Pid>,
    blocked: Option<Pid>,
}

impl RunQueues {
    pub const fn new() -> Self {
        Self { ready: None, blocked: None }
    }

    pub fn ready_is_empty(&self) -> bool {
        self.ready.is_none()
    }

    pub fn blocked_is_empty(&self) -> bool {
        self.blocked.is_none()
    }

    /// Append `pid` to the tail of the ready queue and mark it `Ready`.
    ///
    /// A process already in the ready queue is left where it is.
    pub fn insert_ready(&mut self, table: &mut ProcessTable, pid: Pid) {
        debug!("going to insert process {} to ready queue", pid);
        self.append(table, QueueKind::Ready, pid);
    }

    /// Append `pid` to the tail of the blocked queue and mark it `Blocked`.
    ///
    /// `None` is ignored, as is a process already in the blocked queue.
    pub fn insert_blocked(&mut self, table: &mut ProcessTable, pid: Option<Pid>) {
        if let Some(pid) = pid {
            self.append(table, QueueKind::Blocked, pid);
        }
    }

    /// If `child`'s parent is waiting in the blocked queue, move it to the
    /// tail of the ready queue. Otherwise nothing changes.
    pub fn wake_parent_of(&mut self, table: &mut ProcessTable, child: Pid) {
        let parent = match table.slot(child).parent {
            Some(parent) => parent,
            None => return,
        };
        if self.blocked.is_none() {
            return;
        }

        let mut prev: Option<Pid> = None;
        let mut cur = self.blocked;
        while let Some(pid) = cur {
            let next = table.slot(pid).link.next;
            if pid == parent {
                match prev {
                    None => self.blocked = next,
                    Some(prev) => table.slot_mut(prev).link.next = next,
                }
                let proc = table.slot_mut(pid);
                proc.link.queue = None;
                proc.link.next = None;
                proc.state = ProcessState::Ready;
                self.insert_ready(table, pid);
                return;
            }
            prev = cur;
            cur = next;
        }
    }

    /// Unlink and return the head of the ready queue.
    pub fn pop_ready(&mut self, table: &mut ProcessTable) -> Option<Pid> {
        let pid = self.ready?;
        let proc = table.slot_mut(pid);
        self.ready = proc.link.next;
        proc.link.queue = None;
        proc.link.next = None;
        Some(pid)
    }

    /// Iterate a queue from head to tail.
    pub fn iter<'a>(&self, table: &'a ProcessTable, kind: QueueKind) -> QueueIter<'a> {
        QueueIter {
            table,
            cur: self.head(kind),
        }
    }

    fn head(&self, kind: QueueKind) -> Option<Pid> {
        match kind {
            QueueKind::Ready => self.ready,
            QueueKind::Blocked => self.blocked,
        }
    }

    fn head_mut(&mut self, kind: QueueKind) -> &mut Option<Pid> {
        match kind {
            QueueKind::Ready => &mut self.ready,
            QueueKind::Blocked => &mut self.blocked,
        }
    }

    fn append(&mut self, table: &mut ProcessTable, kind: QueueKind, pid: Pid) {
        match table.slot(pid).link.queue {
            Some(queued) if queued == kind => return,
            Some(other) => panic!(
                "process {} is already linked into the {} queue, cannot insert into the {} queue",
                pid, other, kind
            ),
            None => {}
        }

        let state = match kind {
            QueueKind::Ready => ProcessState::Ready,
            QueueKind::Blocked => ProcessState::Blocked,
        };

        let mut tail = None;
        let mut cur = self.head(kind);
        while let Some(queued) = cur {
            tail = cur;
            cur = table.slot(queued).link.next;
        }
        match tail {
            None => *self.head_mut(kind) = Some(pid),
            Some(tail) => table.slot_mut(tail).link.next = Some(pid),
        }

        let proc = table.slot_mut(pid);
        proc.state = state;
        proc.link.queue = Some(kind);
        proc.link.next = None;
    }
}

/// Walks one run queue in order.
pub struct QueueIter<'a> {
    table: &'a ProcessTable,
    cur: Option<Pid>,
}

impl<'a> Iterator for QueueIter<'a> {
    type Item = Pid;

    fn next(&mut self) -> Option<Pid> {
        let pid = self.cur?;
        self.cur = self.table.slot(pid).link.next;
        Some(pid)
    }
}
