use crate::core::graph::LockOrderGraph;
use crate::core::registry::EdgeWitness;
use crate::core::report::{CycleEntry, DeadlockReport};
use crate::core::thread_state::HeldLock;
use crate::core::types::{MutexId, StackId, ThreadId};

/// A lock-order inversion found while the graph lock was held
///
/// Carries everything needed to build the report after the lock is released.
#[derive(Debug, Clone)]
pub(crate) struct Inversion {
    /// Held lock whose edge into the new lock closes the cycle
    pub held: HeldLock,
    /// Witnesses of the existing path `new lock -> ... -> held`
    pub path: Vec<(MutexId, MutexId, EdgeWitness)>,
}

impl Inversion {
    /// Turn the inversion into a report
    ///
    /// # Arguments
    /// * `thread_id` - thread acquiring `mutex`
    /// * `mutex` - the lock being acquired
    /// * `stack` - where `mutex` is being acquired
    pub fn into_report(self, thread_id: ThreadId, mutex: MutexId, stack: Option<StackId>) -> DeadlockReport {
        let closing = CycleEntry {
            thread_id,
            mutex_before: self.held.mutex,
            mutex_after: mutex,
            stack_before: self.held.stack,
            stack_after: stack,
        };
        DeadlockReport::from_cycle(closing, &self.path)
    }
}

/// Look for the first held lock whose edge into `mutex` would close a cycle
///
/// Held locks equal to `mutex`, and those listed in `skip`, are not checked.
/// Held locks are visited oldest first.
pub(crate) fn find_inversion(
    graph: &mut LockOrderGraph,
    held: &[HeldLock],
    mutex: MutexId,
    skip: &[MutexId],
) -> Option<Inversion> {
    for entry in held {
        if entry.mutex == mutex || skip.contains(&entry.mutex) {
            continue;
        }
        let Some(path) = graph.check_edge(entry.mutex, mutex) else {
            continue;
        };
        // A path without witnesses means the graph changed under us; nothing to report
        if let Some(witnesses) = graph.path_witnesses(&path) {
            return Some(Inversion {
                held: *entry,
                path: witnesses,
            });
        }
    }
    None
}
