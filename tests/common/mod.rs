use lockgraph::{DeadlockReport, Detector, Lockgraph, MutexId, ThreadContext};
use std::sync::{Arc, Mutex as StdMutex, mpsc};
use std::time::Duration;

#[allow(dead_code)]
pub const REPORT_TIMEOUT: Duration = Duration::from_secs(3);
#[allow(dead_code)]
pub const NO_REPORT_TIMEOUT: Duration = Duration::from_millis(300);

pub struct DetectorHarness {
    pub rx: mpsc::Receiver<DeadlockReport>,
    pub reported: Arc<StdMutex<bool>>,
}

/// Install the process-wide detector with a handler feeding a channel
#[allow(dead_code)]
pub fn start_detector() -> DetectorHarness {
    let (tx, rx) = mpsc::channel::<DeadlockReport>();
    let reported = Arc::new(StdMutex::new(false));
    let flag = Arc::clone(&reported);

    // mpsc::Sender is Send but not Sync
    let tx = StdMutex::new(tx);
    Lockgraph::new()
        .on_report(move |report| {
            *flag.lock().unwrap() = true;
            let _ = tx.lock().unwrap().send(report.clone());
        })
        .start()
        .expect("Failed to initialize detector");

    DetectorHarness { rx, reported }
}

#[allow(dead_code)]
pub fn expect_report(h: &DetectorHarness, timeout: Duration) -> DeadlockReport {
    match h.rx.recv_timeout(timeout) {
        Ok(report) => {
            assert!(*h.reported.lock().unwrap(), "Report flag should be set");
            report
        }
        Err(_) => panic!("No report within {timeout:?}"),
    }
}

#[allow(dead_code)]
pub fn assert_no_report(h: &DetectorHarness, timeout: Duration) {
    assert!(
        h.rx.recv_timeout(timeout).is_err(),
        "Unexpected lock-order report"
    );
    assert!(!*h.reported.lock().unwrap(), "Report flag should not be set");
}

/// Blocking acquisition as a host would announce it
///
/// Returns the report of whichever of the two events produced one.
#[allow(dead_code)]
pub fn lock(detector: &Detector, ctx: &mut ThreadContext, mutex: MutexId) -> Option<DeadlockReport> {
    let before = detector.before_lock(ctx, mutex, true);
    let after = detector.after_lock(ctx, mutex, true, false);
    before.or(after)
}

#[allow(dead_code)]
pub fn unlock(detector: &Detector, ctx: &mut ThreadContext, mutex: MutexId) {
    detector.before_unlock(ctx, mutex, true);
}

/// Lock `first` then `second` and release both
#[allow(dead_code)]
pub fn lock_pair(
    detector: &Detector,
    ctx: &mut ThreadContext,
    first: MutexId,
    second: MutexId,
) -> Option<DeadlockReport> {
    let a = lock(detector, ctx, first);
    let b = lock(detector, ctx, second);
    unlock(detector, ctx, second);
    unlock(detector, ctx, first);
    a.or(b)
}
