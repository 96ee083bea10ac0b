use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Logical thread identifier
///
/// Handed to the engine by the host through a [`ThreadContext`](crate::ThreadContext).
/// The process-wide runtime assigns them from a monotonic counter, so an id is
/// never reused while the detector is alive.
pub type ThreadId = usize;

/// Opaque mutex identity
///
/// Usually derived from the address or handle of the target's mutex. The same
/// value may come back after a destroy; the registry then treats it as a new
/// logical mutex.
pub type MutexId = usize;

/// Creation marker of a registry node
///
/// Every get-or-create that actually creates a node draws a fresh generation,
/// which lets stale held-stack entries be told apart from a recreated mutex
/// living at the same identity.
pub type Generation = u64;

/// Opaque handle to a captured stack trace
///
/// Resolving it to frames is the job of whichever [`StackCapture`](crate::StackCapture)
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackId(pub u32);

// Global counter for assigning logical thread ids
static THREAD_ID_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// Allocate the next logical thread id
pub fn next_thread_id() -> ThreadId {
    THREAD_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// The kind of lock event fed into the detector
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Events {
    /// Thread is about to block on a lock
    BeforeLock,
    /// Thread acquired a lock
    AfterLock,
    /// Thread is about to release a lock
    BeforeUnlock,
    /// The mutex is being destroyed
    Destroy,
}

/// Usage inconsistencies and degraded paths absorbed by the detector
///
/// None of these is an error for the instrumented program; they are only
/// recorded in the event log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Anomaly {
    /// Unlock of a mutex the thread does not hold
    UnlockNotHeld,
    /// Destroy of a mutex that was never seen or is already gone
    DestroyUnknown,
    /// Write-lock of a mutex the thread already holds
    DoubleLock,
    /// The registry refused a new mutex
    RegistryFull,
    /// The thread's held stack is full; the lock is not tracked
    HeldStackFull,
    /// Held entries referring to destroyed mutexes were dropped
    StaleHeldLocks,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_thread_id_uniqueness() {
        let (tx, rx) = mpsc::channel();

        let mut handles = vec![];
        for _ in 0..10 {
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                tx.send(next_thread_id()).unwrap();
            }));
        }

        let mut ids = vec![];
        for _ in 0..10 {
            ids.push(rx.recv().unwrap());
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let mut unique_ids = ids.clone();
        unique_ids.sort();
        unique_ids.dedup();
        assert_eq!(ids.len(), unique_ids.len());
        assert!(ids.iter().all(|&id| id >= 1));
    }

    #[test]
    fn test_events_serialize_snake_case() {
        let json = serde_json::to_string(&Events::BeforeUnlock).unwrap();
        assert_eq!(json, "\"before_unlock\"");
    }
}
