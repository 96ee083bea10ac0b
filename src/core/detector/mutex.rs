use crate::core::detector::Detector;
use crate::core::detector::deadlock_handling::find_inversion;
use crate::core::graph::EdgeOutcome;
use crate::core::registry::EdgeWitness;
use crate::core::report::{CycleEntry, DeadlockReport};
use crate::core::thread_state::{PendingAcquire, ThreadContext};
use crate::core::types::{Anomaly, Events, MutexId};

impl Detector {
    /// Register that a thread is about to block on a lock
    ///
    /// Resolves (or creates) the mutex and checks, for every lock the thread
    /// already holds, whether taking `mutex` now would close a cycle in the
    /// lock-order graph. Nothing is committed here; edges are added by
    /// [`after_lock`](Self::after_lock) once the acquisition succeeded.
    ///
    /// # Arguments
    /// * `ctx` - context of the calling thread
    /// * `mutex` - identity of the lock being acquired
    /// * `write` - exclusive (`true`) or shared acquisition
    ///
    /// # Returns
    /// The report if the acquisition closes a cycle
    pub fn before_lock(
        &self,
        ctx: &mut ThreadContext,
        mutex: MutexId,
        write: bool,
    ) -> Option<DeadlockReport> {
        if ctx.is_ignoring_events() {
            return None;
        }
        ctx.report = None;
        ctx.pending = None;
        self.log_event(ctx.id(), mutex, Events::BeforeLock, write, false);

        let mut graph = self.graph.lock();
        let generation = match graph.get_or_create(mutex) {
            Ok((generation, _)) => generation,
            Err(_) => {
                drop(graph);
                self.log_anomaly(ctx.id(), mutex, Anomaly::RegistryFull);
                return None;
            }
        };
        self.prune_stale(&graph, ctx);

        let mut pending = PendingAcquire {
            mutex,
            generation,
            stack: None,
            reported: Vec::new(),
        };

        // Relocking a held mutex is not a lock-order question, and a lock
        // beyond the held-stack limit will not be tracked at all
        if ctx.is_held(mutex) || ctx.held_count() >= self.config.max_held_locks {
            ctx.pending = Some(pending);
            return None;
        }

        let inversion = find_inversion(&mut graph, ctx.snapshot(), mutex, &[]);
        drop(graph);

        let Some(inversion) = inversion else {
            ctx.pending = Some(pending);
            return None;
        };

        let stack = self.capture_stack(ctx);
        pending.stack = stack;
        pending.reported.push(inversion.held.mutex);
        ctx.pending = Some(pending);

        let report = inversion.into_report(ctx.id(), mutex, stack);
        self.log_report(ctx.id(), &report);
        ctx.report = Some(report.clone());
        Some(report)
    }

    /// Register that a thread acquired a lock
    ///
    /// Commits the edges `held -> mutex` for every lock the thread holds and
    /// pushes `mutex` on its held stack. New edges are checked for cycles
    /// unless the matching [`before_lock`](Self::before_lock) already reported
    /// them. A successful try-lock is pushed but creates no incoming edges.
    ///
    /// # Arguments
    /// * `ctx` - context of the calling thread
    /// * `mutex` - identity of the acquired lock
    /// * `write` - exclusive (`true`) or shared acquisition
    /// * `trylock` - the lock was taken without blocking
    ///
    /// # Returns
    /// The report if committing the new edges closed a cycle
    pub fn after_lock(
        &self,
        ctx: &mut ThreadContext,
        mutex: MutexId,
        write: bool,
        trylock: bool,
    ) -> Option<DeadlockReport> {
        if ctx.is_ignoring_events() {
            return None;
        }
        ctx.report = None;
        self.log_event(ctx.id(), mutex, Events::AfterLock, write, trylock);
        let pending = ctx.pending.take().filter(|pending| pending.mutex == mutex);

        let mut graph = self.graph.lock();
        let generation = match graph.get_or_create(mutex) {
            Ok((generation, _)) => generation,
            Err(_) => {
                drop(graph);
                self.log_anomaly(ctx.id(), mutex, Anomaly::RegistryFull);
                return None;
            }
        };
        self.prune_stale(&graph, ctx);
        let pending = pending.filter(|pending| pending.generation == generation);

        if ctx.held_count() >= self.config.max_held_locks {
            drop(graph);
            self.log_anomaly(ctx.id(), mutex, Anomaly::HeldStackFull);
            ctx.mark_untracked(mutex);
            return None;
        }

        let relock = ctx.is_held(mutex);
        // A relock adds no orderings: the mutex is already below every lock
        // taken after it
        let needs_edges = !trylock
            && !relock
            && ctx
                .snapshot()
                .iter()
                .any(|held| held.mutex != mutex && !graph.has_edge(held.mutex, mutex));
        drop(graph);

        if relock && write {
            self.log_anomaly(ctx.id(), mutex, Anomaly::DoubleLock);
        }

        let (pending_stack, reported) = match pending {
            Some(pending) => (pending.stack, pending.reported),
            None => (None, Vec::new()),
        };
        let acquired_at = match pending_stack {
            Some(stack) => Some(stack),
            None if self.config.second_deadlock_stack => self.capture_stack(ctx),
            None => None,
        };
        let edge_stack = match acquired_at {
            Some(stack) => Some(stack),
            None if needs_edges => self.capture_stack(ctx),
            None => None,
        };

        let mut report = None;
        if needs_edges {
            let mut graph = self.graph.lock();
            // The graph was unlocked during stack capture
            self.prune_stale(&graph, ctx);
            let live = graph.registry().is_current(mutex, generation);
            for held in ctx.snapshot().iter().filter(|_| live) {
                if held.mutex == mutex {
                    continue;
                }
                let witness = EdgeWitness {
                    thread_id: ctx.id(),
                    stack_before: held.stack,
                    stack_after: edge_stack,
                };
                let check = report.is_none() && !reported.contains(&held.mutex);
                if let EdgeOutcome::Cycle(path) = graph.add_edge(held.mutex, mutex, witness, check)
                    && let Some(witnesses) = graph.path_witnesses(&path)
                {
                    let closing = CycleEntry {
                        thread_id: ctx.id(),
                        mutex_before: held.mutex,
                        mutex_after: mutex,
                        stack_before: held.stack,
                        stack_after: edge_stack,
                    };
                    report = Some(DeadlockReport::from_cycle(closing, &witnesses));
                }
            }
        }

        let held_stack = if self.config.second_deadlock_stack {
            acquired_at.or(edge_stack)
        } else {
            pending_stack
        };
        if !ctx.push(mutex, generation, held_stack, write, self.config.max_held_locks) {
            self.log_anomaly(ctx.id(), mutex, Anomaly::HeldStackFull);
            ctx.mark_untracked(mutex);
        }

        let report = report?;
        self.log_report(ctx.id(), &report);
        ctx.report = Some(report.clone());
        Some(report)
    }

    /// Register that a thread is about to release a lock
    ///
    /// Removes the most recent held entry for `mutex`; the graph is not
    /// touched. Releasing a lock that is not held is ignored.
    pub fn before_unlock(&self, ctx: &mut ThreadContext, mutex: MutexId, write: bool) {
        if ctx.is_ignoring_events() {
            return;
        }
        ctx.report = None;
        ctx.pending = None;
        self.log_event(ctx.id(), mutex, Events::BeforeUnlock, write, false);

        // The latest acquisition of `mutex` is the untracked one, if any
        if !ctx.take_untracked(mutex) && ctx.pop(mutex).is_none() {
            self.log_anomaly(ctx.id(), mutex, Anomaly::UnlockNotHeld);
        }
    }

    /// Register that a mutex is being destroyed
    ///
    /// Removes the mutex and every edge touching it. Entries for it in other
    /// threads' held stacks are dropped lazily, the next time those threads
    /// call in; an identity reused afterwards starts from a clean node.
    pub fn destroy(&self, ctx: &mut ThreadContext, mutex: MutexId) {
        if ctx.is_ignoring_events() {
            return;
        }
        ctx.report = None;
        ctx.pending = None;
        self.log_event(ctx.id(), mutex, Events::Destroy, false, false);

        let removed = self.graph.lock().remove_lock(mutex);
        if !removed {
            self.log_anomaly(ctx.id(), mutex, Anomaly::DestroyUnknown);
        }
        while ctx.pop(mutex).is_some() {}
        while ctx.take_untracked(mutex) {}
    }

    /// The report produced by the last event on this thread, if any
    ///
    /// Reports are not queued: the next event on the thread discards an
    /// unread one.
    pub fn get_report(&self, ctx: &mut ThreadContext) -> Option<DeadlockReport> {
        ctx.take_report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::detector::DetectorConfig;
    use crate::core::stack::BacktraceDepot;
    use std::sync::Arc;

    #[test]
    fn test_two_thread_inversion() {
        let detector = Detector::default();
        let mut t1 = ThreadContext::new(1);
        let mut t2 = ThreadContext::new(2);

        assert!(detector.before_lock(&mut t1, 1, true).is_none());
        assert!(detector.after_lock(&mut t1, 1, true, false).is_none());
        assert!(detector.before_lock(&mut t1, 2, true).is_none());
        assert!(detector.after_lock(&mut t1, 2, true, false).is_none());
        detector.before_unlock(&mut t1, 2, true);
        detector.before_unlock(&mut t1, 1, true);
        assert!(detector.has_edge(1, 2));

        assert!(detector.before_lock(&mut t2, 2, true).is_none());
        assert!(detector.after_lock(&mut t2, 2, true, false).is_none());
        let report = detector.before_lock(&mut t2, 1, true).unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report.threads(), vec![2, 1]);
        assert_eq!(report.mutexes(), vec![2, 1]);

        // Already reported at before-lock; the commit stays silent
        assert!(detector.after_lock(&mut t2, 1, true, false).is_none());
        assert!(detector.has_edge(2, 1));
        assert!(detector.get_report(&mut t2).is_none());
    }

    #[test]
    fn test_commit_without_before_lock_still_detects() {
        let detector = Detector::default();
        let mut t1 = ThreadContext::new(1);
        let mut t2 = ThreadContext::new(2);

        detector.after_lock(&mut t1, 1, true, false);
        detector.after_lock(&mut t1, 2, true, false);
        detector.after_lock(&mut t2, 2, true, false);
        let report = detector.after_lock(&mut t2, 1, true, false).unwrap();
        assert!(report.is_closed());
        assert_eq!(detector.get_report(&mut t2), Some(report));
    }

    #[test]
    fn test_racing_checks_are_caught_at_commit() {
        let detector = Detector::default();
        let mut t1 = ThreadContext::new(1);
        let mut t2 = ThreadContext::new(2);

        detector.after_lock(&mut t1, 1, true, false);
        detector.after_lock(&mut t2, 2, true, false);

        // Both check before either commits
        assert!(detector.before_lock(&mut t1, 2, true).is_none());
        assert!(detector.before_lock(&mut t2, 1, true).is_none());

        assert!(detector.after_lock(&mut t1, 2, true, false).is_none());
        let report = detector.after_lock(&mut t2, 1, true, false).unwrap();
        assert_eq!(report.len(), 2);
    }

    #[test]
    fn test_relock_is_not_a_cycle() {
        let detector = Detector::default();
        let mut t1 = ThreadContext::new(1);

        detector.after_lock(&mut t1, 1, false, false);
        assert!(detector.before_lock(&mut t1, 1, false).is_none());
        assert!(detector.after_lock(&mut t1, 1, false, false).is_none());
        assert_eq!(t1.held_count(), 2);
        assert_eq!(detector.edge_count(), 0);

        detector.before_unlock(&mut t1, 1, false);
        assert!(t1.is_held(1));
    }

    #[test]
    fn test_relock_under_later_lock_adds_no_back_edge() {
        let detector = Detector::default();
        let mut t1 = ThreadContext::new(1);

        detector.after_lock(&mut t1, 1, false, false);
        detector.after_lock(&mut t1, 2, true, false);
        assert!(detector.before_lock(&mut t1, 1, false).is_none());
        assert!(detector.after_lock(&mut t1, 1, false, false).is_none());

        assert!(detector.has_edge(1, 2));
        assert!(!detector.has_edge(2, 1));
    }

    #[test]
    fn test_trylock_creates_no_incoming_edges() {
        let detector = Detector::default();
        let mut t1 = ThreadContext::new(1);
        let mut t2 = ThreadContext::new(2);

        detector.after_lock(&mut t1, 1, true, false);
        detector.after_lock(&mut t1, 2, true, true);
        assert!(!detector.has_edge(1, 2));
        assert!(t1.is_held(2));

        // Edges out of a try-locked mutex are recorded
        detector.after_lock(&mut t1, 3, true, false);
        assert!(detector.has_edge(2, 3));

        // The reversed order is therefore not an inversion
        detector.after_lock(&mut t2, 2, true, false);
        assert!(detector.before_lock(&mut t2, 1, true).is_none());
    }

    #[test]
    fn test_failed_attempt_leaves_no_trace() {
        let detector = Detector::default();
        let mut t1 = ThreadContext::new(1);

        detector.after_lock(&mut t1, 1, true, false);
        detector.before_lock(&mut t1, 2, true);
        // The attempt on 2 failed; the thread moves on
        detector.before_lock(&mut t1, 3, true);
        detector.after_lock(&mut t1, 3, true, false);

        assert!(!t1.is_held(2));
        assert!(!detector.has_edge(1, 2));
        assert!(detector.has_edge(1, 3));
    }

    #[test]
    fn test_unlock_not_held_is_ignored() {
        let detector = Detector::default();
        let mut t1 = ThreadContext::new(1);
        detector.before_unlock(&mut t1, 42, true);
        assert_eq!(t1.held_count(), 0);
        detector.destroy(&mut t1, 42);
        assert_eq!(detector.mutex_count(), 0);
    }

    #[test]
    fn test_destroy_while_held_elsewhere_is_pruned_lazily() {
        let detector = Detector::default();
        let mut t1 = ThreadContext::new(1);
        let mut t2 = ThreadContext::new(2);

        detector.after_lock(&mut t1, 1, true, false);
        detector.destroy(&mut t2, 1);
        assert!(t1.is_held(1));

        // Identity reused by a new mutex
        detector.after_lock(&mut t2, 1, true, false);
        detector.after_lock(&mut t2, 2, true, false);

        // t1's stale entry must not produce an edge from the new mutex 1
        detector.after_lock(&mut t1, 3, true, false);
        assert!(!t1.is_held(1));
        assert!(!detector.has_edge(1, 3));
        assert!(detector.has_edge(1, 2));
    }

    #[test]
    fn test_capacity_exceeded_skips_checks() {
        let detector = Detector::new(DetectorConfig::new().max_mutexes(2));
        let mut t1 = ThreadContext::new(1);

        detector.after_lock(&mut t1, 1, true, false);
        detector.after_lock(&mut t1, 2, true, false);
        assert!(detector.before_lock(&mut t1, 3, true).is_none());
        assert!(detector.after_lock(&mut t1, 3, true, false).is_none());
        assert!(!t1.is_held(3));
        assert_eq!(detector.mutex_count(), 2);
    }

    #[test]
    fn test_held_stack_limit() {
        let detector = Detector::new(DetectorConfig::new().max_held_locks(1));
        let mut t1 = ThreadContext::new(1);

        detector.after_lock(&mut t1, 1, true, false);
        assert!(detector.before_lock(&mut t1, 2, true).is_none());
        assert!(detector.after_lock(&mut t1, 2, true, false).is_none());
        assert!(!t1.is_held(2));
        assert!(!detector.has_edge(1, 2));

        // Releasing the untracked lock leaves the tracked one alone
        detector.before_unlock(&mut t1, 2, true);
        assert!(t1.is_held(1));
        assert!(!t1.take_untracked(2));

        detector.before_unlock(&mut t1, 1, true);
        assert_eq!(t1.held_count(), 0);
    }

    #[test]
    fn test_untracked_lock_never_reports() {
        let detector = Detector::new(DetectorConfig::new().max_held_locks(1));
        let mut t1 = ThreadContext::new(1);
        let mut t2 = ThreadContext::new(2);

        detector.after_lock(&mut t1, 2, true, false);
        detector.before_unlock(&mut t1, 2, true);
        // t2 holds 2 and acquires 1 beyond its limit: no ordering 2 -> 1
        detector.after_lock(&mut t2, 2, true, false);
        assert!(detector.before_lock(&mut t2, 1, true).is_none());
        assert!(detector.after_lock(&mut t2, 1, true, false).is_none());
        assert_eq!(detector.edge_count(), 0);
    }

    #[test]
    fn test_held_entry_keeps_before_lock_stack() {
        let depot = Arc::new(BacktraceDepot::default());
        let detector = Detector::new(DetectorConfig::new().stack_skip(0))
            .with_stack_capture(depot.clone());
        let mut t1 = ThreadContext::new(1);
        let mut t2 = ThreadContext::new(2);

        detector.after_lock(&mut t1, 1, true, false);
        detector.after_lock(&mut t1, 2, true, false);
        detector.after_lock(&mut t2, 2, true, false);
        let report = detector.before_lock(&mut t2, 1, true).unwrap();
        detector.after_lock(&mut t2, 1, true, false);

        let held = t2.snapshot().iter().find(|h| h.mutex == 1).copied().unwrap();
        assert_eq!(held.stack, report.entries[0].stack_after);

        // Orderings out of mutex 1 carry that site as their first stack
        detector.after_lock(&mut t2, 3, true, false);
        let mut t3 = ThreadContext::new(3);
        detector.after_lock(&mut t3, 3, true, false);
        let cycle = detector.before_lock(&mut t3, 1, true).unwrap();
        let entry = cycle.entries.iter().find(|e| e.mutex_before == 1).unwrap();
        assert_eq!(entry.stack_before, report.entries[0].stack_after);
    }

    #[test]
    fn test_ignored_events_change_nothing() {
        let detector = Detector::default();
        let mut t1 = ThreadContext::new(1);

        detector.after_lock(&mut t1, 1, true, false);
        let previous = t1.set_ignore_events(true);
        assert!(!previous);

        assert!(detector.before_lock(&mut t1, 2, true).is_none());
        assert!(detector.after_lock(&mut t1, 2, true, false).is_none());
        detector.before_unlock(&mut t1, 1, true);
        detector.destroy(&mut t1, 1);

        t1.set_ignore_events(previous);
        assert_eq!(detector.mutex_count(), 1);
        assert_eq!(detector.edge_count(), 0);
        assert!(t1.is_held(1));
    }

    #[test]
    fn test_second_deadlock_stack_fills_both_sites() {
        let depot = Arc::new(BacktraceDepot::default());
        let detector = Detector::new(DetectorConfig::new().second_deadlock_stack(true).stack_skip(0))
            .with_stack_capture(depot.clone());
        let mut t1 = ThreadContext::new(1);
        let mut t2 = ThreadContext::new(2);

        detector.after_lock(&mut t1, 1, true, false);
        detector.after_lock(&mut t1, 2, true, false);
        detector.after_lock(&mut t2, 2, true, false);
        let report = detector.before_lock(&mut t2, 1, true).unwrap();

        if !depot.is_empty() {
            assert!(report.entries[0].stack_before.is_some());
            assert!(report.entries[0].stack_after.is_some());
            assert!(report.entries[1].stack_after.is_some());
        }
    }
}
