//! Process-wide detector
//!
//! Hosts that instrument a whole program (the lock wrappers in this crate, the
//! C ABI) share one [`Detector`]. Every OS thread gets its own
//! [`ThreadContext`] on first use, with a logical id from a monotonic counter.
//!
//! A call arriving while the thread's context is already in use (the detector
//! capturing a stack, a report handler taking locks) is ignored rather than
//! observed.

use crate::core::detector::Detector;
use crate::core::report::DeadlockReport;
use crate::core::thread_state::ThreadContext;
use crate::core::types::{MutexId, ThreadId, next_thread_id};
use anyhow::{Result, bail};
use std::cell::RefCell;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Handler invoked for every report, on the thread that produced it
pub type ReportHandler = Box<dyn Fn(&DeadlockReport) + Send + Sync>;

static DETECTOR: OnceLock<Detector> = OnceLock::new();
static HANDLER: OnceLock<ReportHandler> = OnceLock::new();
static REPORTED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static CONTEXT: RefCell<ThreadContext> = RefCell::new(ThreadContext::new(next_thread_id()));
}

/// Install the process-wide detector and report handler
///
/// # Errors
/// Returns an error if a detector is already installed, including the
/// default one created by an event arriving before this call.
pub fn install(detector: Detector, handler: Option<ReportHandler>) -> Result<()> {
    if DETECTOR.set(detector).is_err() {
        bail!("lock-order detector is already running");
    }
    if let Some(handler) = handler
        && HANDLER.set(handler).is_err()
    {
        bail!("report handler is already installed");
    }
    Ok(())
}

/// Whether a detector has been installed (explicitly or by first use)
pub fn is_running() -> bool {
    DETECTOR.get().is_some()
}

/// The process-wide detector, created with defaults on first use
pub fn detector() -> &'static Detector {
    DETECTOR.get_or_init(Detector::default)
}

/// Run `f` with the calling thread's context
///
/// # Returns
/// `None` if the context is busy (reentrant call) or already torn down
fn with_context<R>(f: impl FnOnce(&Detector, &mut ThreadContext) -> R) -> Option<R> {
    let detector = detector();
    CONTEXT
        .try_with(|cell| {
            let mut ctx = cell.try_borrow_mut().ok()?;
            Some(f(detector, &mut *ctx))
        })
        .ok()
        .flatten()
}

/// Hand a report to the installed handler with the thread's events ignored
fn dispatch(report: &DeadlockReport) {
    REPORTED.store(true, Ordering::SeqCst);
    let Some(handler) = HANDLER.get() else {
        return;
    };
    let previous = with_context(|_, ctx| ctx.set_ignore_events(true));
    handler(report);
    if let Some(previous) = previous {
        with_context(|_, ctx| ctx.set_ignore_events(previous));
    }
}

/// Logical id of the calling thread
pub fn thread_id() -> Option<ThreadId> {
    CONTEXT
        .try_with(|cell| cell.try_borrow().ok().map(|ctx| ctx.id()))
        .ok()
        .flatten()
}

/// The calling thread is about to block on `mutex`
pub fn before_lock(mutex: MutexId, write: bool) {
    if let Some(report) = with_context(|d, ctx| d.before_lock(ctx, mutex, write)).flatten() {
        dispatch(&report);
    }
}

/// The calling thread acquired `mutex`
pub fn after_lock(mutex: MutexId, write: bool, trylock: bool) {
    if let Some(report) =
        with_context(|d, ctx| d.after_lock(ctx, mutex, write, trylock)).flatten()
    {
        dispatch(&report);
    }
}

/// The calling thread is about to release `mutex`
pub fn before_unlock(mutex: MutexId, write: bool) {
    with_context(|d, ctx| d.before_unlock(ctx, mutex, write));
}

/// `mutex` is being destroyed
pub fn destroy(mutex: MutexId) {
    with_context(|d, ctx| d.destroy(ctx, mutex));
}

/// Take the report produced by the calling thread's last event
pub fn last_report() -> Option<DeadlockReport> {
    with_context(|d, ctx| d.get_report(ctx)).flatten()
}

/// Whether any thread produced a report since start or the last reset
pub fn has_reported() -> bool {
    REPORTED.load(Ordering::SeqCst)
}

pub fn reset_reported() {
    REPORTED.store(false, Ordering::SeqCst);
}

/// Flush the event log of the process-wide detector
#[cfg(feature = "logging")]
pub fn flush_log() -> Result<()> {
    detector().flush_log()
}
