//! # lockgraph
//!
//! A runtime lock-order deadlock detector.
//!
//! lockgraph observes lock acquisitions and releases from any number of
//! threads and maintains a global graph of the order in which locks are taken.
//! An edge `A -> B` means some thread acquired `B` while holding `A`. A cycle
//! in this graph is a potential deadlock, reported as soon as the ordering that
//! closes it is attempted, whether or not the program actually hangs.
//!
//! ## Features
//!
//! - Detection from lock events alone, no scheduler involvement
//! - Reports naming every mutex, thread and acquisition site of the cycle
//! - Tracked `Mutex` / `RwLock` wrappers for Rust code
//! - A C ABI for hosts that intercept locking in other languages
//! - Optional JSON-lines event log (feature `logging`)
//!
//! ## Example
//!
//! ```rust
//! use lockgraph::{Lockgraph, Mutex};
//! use std::sync::Arc;
//!
//! Lockgraph::new()
//!     .on_report(|report| eprintln!("potential deadlock: {:?}", report.mutexes()))
//!     .start()
//!     .unwrap();
//!
//! let a = Arc::new(Mutex::new(0));
//! let b = Arc::new(Mutex::new(0));
//! {
//!     let _a = a.lock();
//!     let _b = b.lock();
//! }
//! // Taking them in the opposite order now reports an inversion
//! let _b = b.lock();
//! let _a = a.lock();
//! ```
//!
//! Embedders that manage threads themselves can drive a [`Detector`] directly
//! with one [`ThreadContext`] per thread.

mod core;
pub use core::{
    Lockgraph,
    detector::{Detector, DetectorConfig},
    graph::{EdgeOutcome, LockOrderGraph},
    locks::{
        mutex::{Mutex, MutexGuard},
        rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    },
    registry::{EdgeWitness, MutexNode, MutexRegistry, RegistryError},
    replay::{ReplaySummary, Replayer, TraceEvent},
    report::{CycleEntry, DeadlockReport},
    runtime,
    stack::{BacktraceDepot, NoStacks, StackCapture},
    thread_state::{HeldLock, ThreadContext},
    types::{Anomaly, Events, Generation, MutexId, StackId, ThreadId},
};

#[cfg(feature = "logging")]
pub use core::logger::{EventLogger, LogRecord};

pub mod ffi;
