use crate::core::registry::EdgeWitness;
use crate::core::types::{MutexId, StackId, ThreadId};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// One edge of a reported lock-order cycle
///
/// Reads as: thread `thread_id` locked `mutex_after` while holding
/// `mutex_before`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleEntry {
    /// Thread that witnessed this ordering
    pub thread_id: ThreadId,
    /// Lock that was already held
    pub mutex_before: MutexId,
    /// Lock that was acquired while `mutex_before` was held
    pub mutex_after: MutexId,
    /// Where `mutex_before` was acquired
    pub stack_before: Option<StackId>,
    /// Where `mutex_after` was acquired
    pub stack_after: Option<StackId>,
}

impl CycleEntry {
    fn from_witness(before: MutexId, after: MutexId, witness: &EdgeWitness) -> Self {
        CycleEntry {
            thread_id: witness.thread_id,
            mutex_before: before,
            mutex_after: after,
            stack_before: witness.stack_before,
            stack_after: witness.stack_after,
        }
    }
}

/// A potential deadlock: a cycle in the lock-order graph
///
/// Entries are in cycle order. The first entry is the ordering that closed
/// the cycle; each following entry starts where the previous one ended, and
/// the last one ends at the first entry's `mutex_before`.
///
/// Reports are transient: they are handed to the caller of the event that
/// produced them and are not retained by the detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlockReport {
    pub entries: Vec<CycleEntry>,
    /// Number of entries, carried in the JSON form for C callers
    pub count: usize,
    /// RFC 3339 timestamp of when the cycle was found
    pub timestamp: String,
}

impl DeadlockReport {
    /// Build a report from the edge that closed a cycle and the existing path
    /// it closed
    ///
    /// # Arguments
    /// * `closing` - the new ordering `before -> after`
    /// * `path` - witnesses of the existing path `after -> ... -> before`
    pub fn from_cycle(closing: CycleEntry, path: &[(MutexId, MutexId, EdgeWitness)]) -> Self {
        let mut entries = Vec::with_capacity(path.len() + 1);
        entries.push(closing);
        entries.extend(
            path.iter()
                .map(|(before, after, witness)| CycleEntry::from_witness(*before, *after, witness)),
        );

        DeadlockReport {
            count: entries.len(),
            entries,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Number of edges in the cycle
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mutexes of the cycle in cycle order
    pub fn mutexes(&self) -> Vec<MutexId> {
        self.entries.iter().map(|entry| entry.mutex_before).collect()
    }

    /// Witness threads in cycle order (may repeat)
    pub fn threads(&self) -> Vec<ThreadId> {
        self.entries.iter().map(|entry| entry.thread_id).collect()
    }

    /// Whether consecutive entries chain into a closed loop
    pub fn is_closed(&self) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let n = self.entries.len();
        (0..n).all(|i| self.entries[i].mutex_after == self.entries[(i + 1) % n].mutex_before)
    }
}
