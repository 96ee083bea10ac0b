//! C ABI for the lock-order detector
//!
//! A host that intercepts locking in another language (an `LD_PRELOAD` shim,
//! a runtime's mutex hooks) forwards every event here. The mutex identity is
//! the address of the host's mutex object; the calling OS thread is tracked
//! through the process-wide runtime.
//!
//! Reports are delivered to the registered callback as JSON strings, valid
//! only for the duration of the call.
//!
//! Typical use from C:
//!
//! ```c
//! lockgraph_init(NULL, on_report);
//!
//! lockgraph_before_lock(m, 1);
//! pthread_mutex_lock(m);
//! lockgraph_after_lock(m, 1, 0);
//! /* ... */
//! lockgraph_before_unlock(m, 1);
//! pthread_mutex_unlock(m);
//! ```

use crate::core::detector::{Detector, DetectorConfig};
use crate::core::runtime;
use crate::core::stack::BacktraceDepot;
use crate::core::types::StackId;
use std::ffi::{CStr, CString, c_void};
use std::os::raw::{c_char, c_int, c_ulong};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

lazy_static::lazy_static! {
    /// Stack store shared by the detector and `lockgraph_resolve_stack`
    static ref STACK_DEPOT: Arc<BacktraceDepot> = Arc::new(BacktraceDepot::default());
}

// Settings recorded before `lockgraph_init`
static CAPTURE_STACKS: AtomicBool = AtomicBool::new(false);
static SECOND_DEADLOCK_STACK: AtomicBool = AtomicBool::new(false);

/// Enable stack capture for reports
///
/// Must be called before `lockgraph_init`.
///
/// # Arguments
/// * `enabled` - non-zero to capture the stack of every contended acquisition
/// * `second_deadlock_stack` - non-zero to also capture where every held lock
///   was acquired
///
/// # Returns
/// * `0` on success
/// * `1` if the detector is already running
#[unsafe(no_mangle)]
pub extern "C" fn lockgraph_set_stack_capture(enabled: c_int, second_deadlock_stack: c_int) -> c_int {
    if runtime::is_running() {
        return 1;
    }
    CAPTURE_STACKS.store(enabled != 0, Ordering::SeqCst);
    SECOND_DEADLOCK_STACK.store(second_deadlock_stack != 0, Ordering::SeqCst);
    0
}

/// Initialize the detector
///
/// # Arguments
/// * `log_path` - Path to a log file as a null-terminated C string, or NULL to disable logging
/// * `callback` - Function called with each report as a JSON string, or NULL
///
/// # Returns
/// * `0` on success
/// * `1` if the detector is already running
/// * `-1` if the log path contains invalid UTF-8
/// * `-2` if the logger failed to initialize
/// * `-3` if logging was requested but the `logging` feature is disabled
///
/// # Safety
/// The caller must ensure `log_path` is either NULL or a valid null-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lockgraph_init(
    log_path: *const c_char,
    callback: Option<extern "C" fn(*const c_char)>,
) -> c_int {
    if runtime::is_running() {
        return 1;
    }

    let log_path = if log_path.is_null() {
        None
    } else {
        match unsafe { CStr::from_ptr(log_path) }.to_str() {
            Ok(path) => Some(path),
            Err(_) => return -1,
        }
    };

    let config =
        DetectorConfig::new().second_deadlock_stack(SECOND_DEADLOCK_STACK.load(Ordering::SeqCst));
    let mut detector = Detector::new(config);
    if CAPTURE_STACKS.load(Ordering::SeqCst) {
        detector = detector.with_stack_capture(STACK_DEPOT.clone());
    }

    #[cfg(feature = "logging")]
    if let Some(path) = log_path {
        match crate::core::logger::EventLogger::with_file(path) {
            Ok(logger) => detector = detector.with_logger(logger),
            Err(_) => return -2,
        }
    }
    #[cfg(not(feature = "logging"))]
    if log_path.is_some() {
        return -3;
    }

    let handler: runtime::ReportHandler = Box::new(move |report| {
        if let Some(cb) = callback
            && let Ok(json) = serde_json::to_string(report)
            && let Ok(c_str) = CString::new(json)
        {
            cb(c_str.as_ptr());
        }
    });

    match runtime::install(detector, Some(handler)) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

/// Logical id of the calling thread, `0` if it cannot be determined
#[unsafe(no_mangle)]
pub extern "C" fn lockgraph_thread_id() -> c_ulong {
    runtime::thread_id().unwrap_or(0) as c_ulong
}

/// The calling thread is about to block on `mutex`
#[unsafe(no_mangle)]
pub extern "C" fn lockgraph_before_lock(mutex: *const c_void, write: c_int) {
    runtime::before_lock(mutex as usize, write != 0);
}

/// The calling thread acquired `mutex`
///
/// `trylock` must be non-zero for an acquisition made without blocking.
#[unsafe(no_mangle)]
pub extern "C" fn lockgraph_after_lock(mutex: *const c_void, write: c_int, trylock: c_int) {
    runtime::after_lock(mutex as usize, write != 0, trylock != 0);
}

/// The calling thread is about to release `mutex`
#[unsafe(no_mangle)]
pub extern "C" fn lockgraph_before_unlock(mutex: *const c_void, write: c_int) {
    runtime::before_unlock(mutex as usize, write != 0);
}

/// `mutex` is being destroyed; its address may be reused afterwards
#[unsafe(no_mangle)]
pub extern "C" fn lockgraph_destroy(mutex: *const c_void) {
    runtime::destroy(mutex as usize);
}

/// Report produced by the calling thread's last event
///
/// # Returns
/// The report as a JSON string to be released with `lockgraph_free_string`,
/// or NULL if the last event produced none
#[unsafe(no_mangle)]
pub extern "C" fn lockgraph_last_report() -> *mut c_char {
    runtime::last_report()
        .and_then(|report| serde_json::to_string(&report).ok())
        .and_then(|json| CString::new(json).ok())
        .map_or(std::ptr::null_mut(), CString::into_raw)
}

/// Symbolize a stack id found in a report
///
/// # Returns
/// A JSON array of frame strings to be released with `lockgraph_free_string`,
/// or NULL if stack capture is disabled or the id is unknown
#[unsafe(no_mangle)]
pub extern "C" fn lockgraph_resolve_stack(stack_id: u32) -> *mut c_char {
    let frames = STACK_DEPOT.resolve_symbols(StackId(stack_id));
    if frames.is_empty() {
        return std::ptr::null_mut();
    }
    serde_json::to_string(&frames)
        .ok()
        .and_then(|json| CString::new(json).ok())
        .map_or(std::ptr::null_mut(), CString::into_raw)
}

/// Release a string returned by this library
///
/// # Safety
/// `s` must be NULL or a pointer returned by `lockgraph_last_report` or
/// `lockgraph_resolve_stack` that has not been freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lockgraph_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}

/// Check if a potential deadlock has been reported
///
/// # Returns
/// * `1` if a report was produced since start or the last reset
/// * `0` otherwise
#[unsafe(no_mangle)]
pub extern "C" fn lockgraph_has_report() -> c_int {
    if runtime::has_reported() { 1 } else { 0 }
}

/// Reset the report flag
#[unsafe(no_mangle)]
pub extern "C" fn lockgraph_reset_report_flag() {
    runtime::reset_reported();
}

/// Flush the event log
///
/// # Returns
/// * `0` on success or when logging is disabled
/// * `-1` if the log could not be flushed
#[unsafe(no_mangle)]
pub extern "C" fn lockgraph_flush_log() -> c_int {
    #[cfg(feature = "logging")]
    if runtime::flush_log().is_err() {
        return -1;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::report::DeadlockReport;

    fn take_report() -> Option<DeadlockReport> {
        let raw = lockgraph_last_report();
        if raw.is_null() {
            return None;
        }
        let json = unsafe { CStr::from_ptr(raw) }.to_str().unwrap().to_owned();
        unsafe { lockgraph_free_string(raw) };
        Some(serde_json::from_str(&json).unwrap())
    }

    #[test]
    fn test_address_inversion_through_c_abi() {
        let a = Box::new(0u64);
        let b = Box::new(0u64);
        let pa = &*a as *const u64 as *const c_void;
        let pb = &*b as *const u64 as *const c_void;

        lockgraph_before_lock(pa, 1);
        lockgraph_after_lock(pa, 1, 0);
        lockgraph_before_lock(pb, 1);
        lockgraph_after_lock(pb, 1, 0);
        lockgraph_before_unlock(pb, 1);
        lockgraph_before_unlock(pa, 1);
        assert!(take_report().is_none());

        let (pa, pb) = (pa as usize, pb as usize);
        std::thread::spawn(move || {
            let (pa, pb) = (pa as *const c_void, pb as *const c_void);
            lockgraph_before_lock(pb, 1);
            lockgraph_after_lock(pb, 1, 0);
            lockgraph_before_lock(pa, 1);
            let report = take_report().unwrap();
            assert_eq!(report.mutexes(), vec![pb as usize, pa as usize]);
            lockgraph_after_lock(pa, 1, 0);
            lockgraph_before_unlock(pa, 1);
            lockgraph_before_unlock(pb, 1);
        })
        .join()
        .unwrap();

        assert_eq!(lockgraph_has_report(), 1);
        lockgraph_destroy(pa as *const c_void);
        lockgraph_destroy(pb as *const c_void);
    }

    #[test]
    fn test_thread_id_is_nonzero() {
        assert_ne!(lockgraph_thread_id(), 0);
    }

    #[test]
    fn test_unknown_stack_resolves_to_null() {
        assert!(lockgraph_resolve_stack(u32::MAX).is_null());
        unsafe { lockgraph_free_string(std::ptr::null_mut()) };
    }
}
