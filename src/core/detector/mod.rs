pub mod deadlock_handling;
pub mod mutex;

use crate::core::graph::LockOrderGraph;
#[cfg(feature = "logging")]
use crate::core::logger::EventLogger;
use crate::core::report::DeadlockReport;
use crate::core::stack::{NoStacks, StackCapture};
use crate::core::thread_state::ThreadContext;
use crate::core::types::{Anomaly, Events, MutexId, StackId, ThreadId};
use parking_lot::Mutex;
use std::sync::Arc;

/// Configuration for the lock-order detector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorConfig {
    /// Capture the acquisition site of every lock at after-lock, so reports
    /// also show where the already-held lock was taken
    pub second_deadlock_stack: bool,
    /// Upper bound on live mutexes; `None` is unbounded
    pub max_mutexes: Option<usize>,
    /// Upper bound on locks tracked per thread at once
    pub max_held_locks: usize,
    /// Innermost frames dropped from every captured stack
    pub stack_skip: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            second_deadlock_stack: false,
            max_mutexes: None,
            max_held_locks: 64,
            stack_skip: 3,
        }
    }
}

impl DetectorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn second_deadlock_stack(mut self, enabled: bool) -> Self {
        self.second_deadlock_stack = enabled;
        self
    }

    pub fn max_mutexes(mut self, capacity: usize) -> Self {
        self.max_mutexes = Some(capacity);
        self
    }

    pub fn max_held_locks(mut self, capacity: usize) -> Self {
        self.max_held_locks = capacity;
        self
    }

    pub fn stack_skip(mut self, frames: usize) -> Self {
        self.stack_skip = frames;
        self
    }
}

/// Lock-order deadlock detector
///
/// The Detector consumes lock events from any number of threads and keeps a
/// single lock-order graph shared by all of them.
///
/// # How it works
///
/// 1. Every thread owns a [`ThreadContext`] with the stack of locks it holds
/// 2. When a thread is about to lock M, every held lock H is checked: if M can
///    already reach H in the graph, the edge H -> M closes a cycle and a
///    [`DeadlockReport`] is produced
/// 3. When the lock is acquired, the edges H -> M are committed
/// 4. Unlock pops M from the thread's held stack; destroy removes M from the graph
///
/// Registry lookups, cycle checks and edge commits happen under one lock so
/// that two threads can never close a cycle without one of them seeing it.
pub struct Detector {
    config: DetectorConfig,
    graph: Mutex<LockOrderGraph>,
    stacks: Arc<dyn StackCapture>,
    #[cfg(feature = "logging")]
    logger: Option<EventLogger>,
}

impl Default for Detector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Detector {
    /// Create a detector that captures no stacks and logs nothing
    pub fn new(config: DetectorConfig) -> Self {
        Detector {
            graph: Mutex::new(LockOrderGraph::new(config.max_mutexes)),
            config,
            stacks: Arc::new(NoStacks),
            #[cfg(feature = "logging")]
            logger: None,
        }
    }

    /// Use `stacks` to capture acquisition sites
    pub fn with_stack_capture(mut self, stacks: Arc<dyn StackCapture>) -> Self {
        self.stacks = stacks;
        self
    }

    /// Record events, reports and anomalies with `logger`
    #[cfg(feature = "logging")]
    pub fn with_logger(mut self, logger: EventLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Number of live mutexes
    pub fn mutex_count(&self) -> usize {
        self.graph.lock().registry().len()
    }

    /// Number of recorded lock-order edges
    pub fn edge_count(&self) -> usize {
        self.graph.lock().registry().edge_count()
    }

    /// Whether the ordering `before -> after` has been recorded
    pub fn has_edge(&self, before: MutexId, after: MutexId) -> bool {
        self.graph.lock().has_edge(before, after)
    }

    /// Flush the event log, if any
    #[cfg(feature = "logging")]
    pub fn flush_log(&self) -> anyhow::Result<()> {
        match &self.logger {
            Some(logger) => logger.flush(),
            None => Ok(()),
        }
    }

    /// Capture the current stack with the thread's events suppressed
    fn capture_stack(&self, ctx: &mut ThreadContext) -> Option<StackId> {
        let thread_id = ctx.id();
        let skip = self.config.stack_skip;
        let stacks = &self.stacks;
        ctx.suppressed(|| stacks.capture(thread_id, skip))
    }

    /// Drop held entries whose mutex no longer exists in this incarnation
    fn prune_stale(&self, graph: &LockOrderGraph, ctx: &mut ThreadContext) {
        let registry = graph.registry();
        let dropped = ctx.prune(|mutex, generation| registry.is_current(mutex, generation));
        if dropped > 0 {
            self.log_anomaly(ctx.id(), 0, Anomaly::StaleHeldLocks);
        }
    }

    #[allow(unused_variables)]
    fn log_event(
        &self,
        thread_id: ThreadId,
        mutex: MutexId,
        event: Events,
        write: bool,
        trylock: bool,
    ) {
        #[cfg(feature = "logging")]
        if let Some(logger) = &self.logger {
            logger.log_event(thread_id, mutex, event, write, trylock);
        }
    }

    #[allow(unused_variables)]
    fn log_anomaly(&self, thread_id: ThreadId, mutex: MutexId, anomaly: Anomaly) {
        #[cfg(feature = "logging")]
        if let Some(logger) = &self.logger {
            logger.log_anomaly(thread_id, mutex, anomaly);
        }
    }

    #[allow(unused_variables)]
    fn log_report(&self, thread_id: ThreadId, report: &DeadlockReport) {
        #[cfg(feature = "logging")]
        if let Some(logger) = &self.logger {
            logger.log_report(thread_id, report);
        }
    }
}
