// Core types
pub mod types;
pub use types::*;

// Mutex registry and lock-order graph
pub mod graph;
pub mod registry;

// Per-thread state and reports
pub mod report;
pub mod stack;
pub mod thread_state;

// Event logging
#[cfg(feature = "logging")]
pub mod logger;

// Deadlock detector
pub mod detector;
pub mod replay;
pub mod runtime;

// Tracked lock wrappers
pub mod locks;

use crate::core::detector::{Detector, DetectorConfig};
use crate::core::report::DeadlockReport;
use crate::core::stack::StackCapture;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Configuration of the process-wide detector
///
/// # Example
///
/// ```rust
/// use lockgraph::{DetectorConfig, Lockgraph};
///
/// Lockgraph::new()
///     .with_config(DetectorConfig::new().max_held_locks(32))
///     .on_report(|report| eprintln!("lock-order inversion over {:?}", report.mutexes()))
///     .start()
///     .expect("detector already running");
/// ```
pub struct Lockgraph {
    config: DetectorConfig,
    log_path: Option<String>,
    stacks: Option<Arc<dyn StackCapture>>,
    callback: Box<dyn Fn(&DeadlockReport) + Send + Sync>,
}

impl Default for Lockgraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Lockgraph {
    /// Create a builder with default settings
    ///
    /// By default:
    /// - No stacks are captured
    /// - Logging is disabled
    /// - Reports are printed to stderr as JSON
    pub fn new() -> Self {
        Lockgraph {
            config: DetectorConfig::default(),
            log_path: None,
            stacks: None,
            callback: Box::new(|report: &DeadlockReport| {
                eprintln!(
                    "lock-order inversion detected: {}",
                    serde_json::to_string_pretty(report).unwrap_or_else(|_| format!("{:?}", report))
                );
            }),
        }
    }

    pub fn with_config(mut self, config: DetectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Activate logging and set the path of the log file
    ///
    /// # Arguments
    /// * `path` - Path to the log file. If the path contains "{timestamp}",
    ///   it will be replaced with the current timestamp.
    #[cfg(feature = "logging")]
    pub fn with_log<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.log_path = Some(path.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Capture acquisition sites with `stacks`
    pub fn with_stack_capture(mut self, stacks: Arc<dyn StackCapture>) -> Self {
        self.stacks = Some(stacks);
        self
    }

    /// Set the callback invoked for every report
    ///
    /// The callback runs on the thread whose lock event produced the report.
    /// Locks it takes are not observed by the detector.
    pub fn on_report<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DeadlockReport) + Send + Sync + 'static,
    {
        self.callback = Box::new(callback);
        self
    }

    /// Install the configured detector for the whole process
    ///
    /// # Errors
    /// Returns an error if the log file cannot be created or if a detector is
    /// already running
    pub fn start(self) -> Result<()> {
        let mut detector = Detector::new(self.config);
        if let Some(stacks) = self.stacks {
            detector = detector.with_stack_capture(stacks);
        }

        #[cfg(feature = "logging")]
        if let Some(log_path) = &self.log_path {
            let logger = logger::EventLogger::with_file(log_path)
                .context("Failed to initialize logger")?;
            detector = detector.with_logger(logger);
        }
        #[cfg(not(feature = "logging"))]
        let _ = self.log_path;

        runtime::install(detector, Some(self.callback)).context("Failed to start detector")
    }
}
