//! Per-thread lock state
//!
//! A [`ThreadContext`] is owned by exactly one thread of the instrumented
//! program and handed to every detector call made from that thread. It holds
//! the stack of currently held locks, the acquisition announced by the last
//! before-lock, the last report, and the reentrancy guard.

use crate::core::report::DeadlockReport;
use crate::core::types::{Generation, MutexId, StackId, ThreadId};

/// One entry of a thread's held stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeldLock {
    pub mutex: MutexId,
    /// Creation marker of the node this entry refers to
    pub generation: Generation,
    /// Where the lock was acquired, if captured
    pub stack: Option<StackId>,
    pub write: bool,
}

/// Acquisition announced by before-lock and not yet confirmed by after-lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingAcquire {
    pub mutex: MutexId,
    pub generation: Generation,
    /// Stack captured at before-lock
    pub stack: Option<StackId>,
    /// Held locks whose edge into `mutex` was already reported
    pub reported: Vec<MutexId>,
}

/// State of one thread of the instrumented program
#[derive(Debug)]
pub struct ThreadContext {
    id: ThreadId,
    held: Vec<HeldLock>,
    /// Acquisitions made while the held stack was full
    untracked: Vec<MutexId>,
    pub(crate) pending: Option<PendingAcquire>,
    pub(crate) report: Option<DeadlockReport>,
    ignore_events: bool,
}

impl ThreadContext {
    /// Create the context for a thread with logical id `id`
    pub fn new(id: ThreadId) -> Self {
        ThreadContext {
            id,
            held: Vec::with_capacity(8),
            untracked: Vec::new(),
            pending: None,
            report: None,
            ignore_events: false,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Append an acquisition to the held stack
    ///
    /// # Returns
    /// `false` if the stack already holds `capacity` entries; nothing is recorded then
    pub fn push(
        &mut self,
        mutex: MutexId,
        generation: Generation,
        stack: Option<StackId>,
        write: bool,
        capacity: usize,
    ) -> bool {
        if self.held.len() >= capacity {
            return false;
        }
        self.held.push(HeldLock {
            mutex,
            generation,
            stack,
            write,
        });
        true
    }

    /// Remove the most recent entry for `mutex`
    ///
    /// Mis-nested unlocks are fine: the entry does not have to be on top.
    ///
    /// # Returns
    /// The removed entry, `None` if `mutex` was not held
    pub fn pop(&mut self, mutex: MutexId) -> Option<HeldLock> {
        let index = self.held.iter().rposition(|held| held.mutex == mutex)?;
        Some(self.held.remove(index))
    }

    /// Remember an acquisition that was not pushed on the held stack
    pub(crate) fn mark_untracked(&mut self, mutex: MutexId) {
        self.untracked.push(mutex);
    }

    /// Forget the most recent untracked acquisition of `mutex`
    ///
    /// # Returns
    /// `false` if there was none
    pub fn take_untracked(&mut self, mutex: MutexId) -> bool {
        match self.untracked.iter().rposition(|&m| m == mutex) {
            Some(index) => {
                self.untracked.remove(index);
                true
            }
            None => false,
        }
    }

    /// Currently held locks, oldest first
    pub fn snapshot(&self) -> &[HeldLock] {
        &self.held
    }

    pub fn is_held(&self, mutex: MutexId) -> bool {
        self.held.iter().any(|held| held.mutex == mutex)
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// Drop held entries whose mutex was destroyed (or destroyed and recreated)
    ///
    /// # Returns
    /// Number of entries dropped
    pub(crate) fn prune(&mut self, mut is_live: impl FnMut(MutexId, Generation) -> bool) -> usize {
        let before = self.held.len();
        self.held
            .retain(|held| is_live(held.mutex, held.generation));
        before - self.held.len()
    }

    /// Last report produced on this thread
    pub fn report(&self) -> Option<&DeadlockReport> {
        self.report.as_ref()
    }

    /// Take the last report produced on this thread
    pub fn take_report(&mut self) -> Option<DeadlockReport> {
        self.report.take()
    }

    /// Whether events are currently being ignored
    pub fn is_ignoring_events(&self) -> bool {
        self.ignore_events
    }

    /// Raise or lower the reentrancy guard
    ///
    /// # Returns
    /// The previous state, to be restored by the caller
    pub fn set_ignore_events(&mut self, ignore: bool) -> bool {
        std::mem::replace(&mut self.ignore_events, ignore)
    }

    /// Run `f` with events from this thread ignored
    ///
    /// Used around the detector's own bookkeeping (stack capture, report
    /// delivery) so locks taken there are not observed.
    pub fn suppressed<R>(&mut self, f: impl FnOnce() -> R) -> R {
        let previous = std::mem::replace(&mut self.ignore_events, true);
        let result = f();
        self.ignore_events = previous;
        result
    }

    /// Forget all held locks, e.g. when the thread is torn down
    pub fn clear(&mut self) {
        self.held.clear();
        self.untracked.clear();
        self.pending = None;
        self.report = None;
    }
}
