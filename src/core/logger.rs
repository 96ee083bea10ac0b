//! Event logger for the lock-order detector
//!
//! Records every event the detector handles, every report it produces and
//! every usage inconsistency it absorbs, one JSON object per line. Writing
//! happens on a background thread; the instrumented thread only pays for a
//! channel send.

use crate::core::report::DeadlockReport;
use crate::core::types::{Anomaly, Events, MutexId, ThreadId};
use anyhow::{Context, Result};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// A single line of the event log
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    /// A lock event as received by the detector
    Event {
        thread_id: ThreadId,
        mutex_id: MutexId,
        event: Events,
        write: bool,
        trylock: bool,
        timestamp: f64,
    },
    /// A potential deadlock
    Report {
        thread_id: ThreadId,
        report: DeadlockReport,
        timestamp: f64,
    },
    /// An absorbed usage inconsistency
    Anomaly {
        thread_id: ThreadId,
        mutex_id: MutexId,
        anomaly: Anomaly,
        timestamp: f64,
    },
}

/// Commands for controlling the async logger thread
#[derive(Debug)]
enum LoggerCommand {
    Record(LogRecord),
    /// Flush all pending records to disk and signal completion
    Flush(Sender<()>),
}

/// Seconds since the Unix epoch with microsecond precision
fn now() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + now.timestamp_subsec_micros() as f64 / 1_000_000.0
}

/// Asynchronous JSON-lines logger
pub struct EventLogger {
    sender: Sender<LoggerCommand>,
    path: PathBuf,
}

impl std::fmt::Debug for EventLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLogger").field("path", &self.path).finish()
    }
}

impl Drop for EventLogger {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            eprintln!("Warning: Failed to flush logs during EventLogger drop: {e:?}");
        }
    }
}

impl EventLogger {
    /// Create a logger writing to `path`
    ///
    /// If the file name contains `{timestamp}` it is replaced with the current
    /// time. Missing parent directories are created.
    ///
    /// # Errors
    /// Returns an error if the directory or the file cannot be created, or the
    /// writer thread cannot be spawned.
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();

        #[allow(clippy::literal_string_with_formatting_args)]
        let file_path = if path_buf.to_string_lossy().contains("{timestamp}") {
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
            PathBuf::from(
                path_buf
                    .to_string_lossy()
                    .replace("{timestamp}", &timestamp.to_string()),
            )
        } else {
            path_buf
        };

        if let Some(parent) = file_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&file_path)
            .with_context(|| format!("Failed to open log file {}", file_path.display()))?;

        let (tx, rx) = unbounded::<LoggerCommand>();
        thread::Builder::new()
            .name("lockgraph-logger".into())
            .spawn(move || async_logger_thread(file, rx))
            .context("Failed to spawn logger thread")?;

        Ok(EventLogger {
            sender: tx,
            path: file_path,
        })
    }

    /// Path of the file being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn send(&self, record: LogRecord) {
        if let Err(e) = self.sender.send(LoggerCommand::Record(record)) {
            eprintln!("Failed to send log record: {e:?}");
        }
    }

    pub fn log_event(
        &self,
        thread_id: ThreadId,
        mutex_id: MutexId,
        event: Events,
        write: bool,
        trylock: bool,
    ) {
        self.send(LogRecord::Event {
            thread_id,
            mutex_id,
            event,
            write,
            trylock,
            timestamp: now(),
        });
    }

    pub fn log_report(&self, thread_id: ThreadId, report: &DeadlockReport) {
        self.send(LogRecord::Report {
            thread_id,
            report: report.clone(),
            timestamp: now(),
        });
    }

    pub fn log_anomaly(&self, thread_id: ThreadId, mutex_id: MutexId, anomaly: Anomaly) {
        self.send(LogRecord::Anomaly {
            thread_id,
            mutex_id,
            anomaly,
            timestamp: now(),
        });
    }

    /// Block until every record sent so far is on disk
    ///
    /// # Errors
    /// Returns an error if the writer thread is gone or does not answer
    /// within ten seconds.
    pub fn flush(&self) -> Result<()> {
        let (flush_tx, flush_rx) = bounded(1);
        self.sender
            .send(LoggerCommand::Flush(flush_tx))
            .context("Logger thread is gone")?;
        flush_rx
            .recv_timeout(Duration::from_secs(10))
            .context("Flush operation timed out")
    }
}

fn async_logger_thread(file: File, rx: Receiver<LoggerCommand>) {
    let mut writer = BufWriter::new(file);

    // Loop until the channel is closed
    while let Ok(cmd) = rx.recv() {
        match cmd {
            LoggerCommand::Record(record) => {
                if let Ok(json) = serde_json::to_string(&record)
                    && let Err(e) = writeln!(writer, "{json}")
                {
                    eprintln!("Logger write error: {e:?}");
                }
            }
            LoggerCommand::Flush(responder) => {
                if let Err(e) = writer.flush() {
                    eprintln!("Logger flush error: {e:?}");
                }
                let _ = responder.send(());
            }
        }
    }

    if let Err(e) = writer.flush() {
        eprintln!("Logger final flush error: {e:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::report::CycleEntry;
    use tempfile::TempDir;

    #[test]
    fn test_basic_logging() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("basic.log");

        let logger = EventLogger::with_file(&log_path).unwrap();
        logger.log_event(1, 10, Events::BeforeLock, true, false);
        logger.log_event(1, 10, Events::AfterLock, true, false);
        logger.log_anomaly(1, 11, Anomaly::UnlockNotHeld);
        logger.log_event(1, 10, Events::BeforeUnlock, true, false);
        logger.flush().unwrap();

        let contents = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("\"kind\":\"event\""));
        assert!(lines[0].contains("\"event\":\"before_lock\""));
        assert!(lines[2].contains("\"anomaly\":\"unlock_not_held\""));
    }

    #[test]
    fn test_report_record() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("report.log");
        let logger = EventLogger::with_file(&log_path).unwrap();

        let report = DeadlockReport::from_cycle(
            CycleEntry {
                thread_id: 2,
                mutex_before: 20,
                mutex_after: 10,
                stack_before: None,
                stack_after: None,
            },
            &[],
        );
        logger.log_report(2, &report);
        logger.flush().unwrap();

        let contents = std::fs::read_to_string(&log_path).unwrap();
        let value: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(value["kind"], "report");
        assert_eq!(value["report"]["entries"][0]["mutex_before"], 20);
    }

    #[test]
    fn test_timestamp_placeholder_and_directories() {
        let temp_dir = TempDir::new().unwrap();
        let pattern = temp_dir.path().join("nested/dir/log_{timestamp}.jsonl");

        let logger = EventLogger::with_file(&pattern).unwrap();
        assert!(!logger.path().to_string_lossy().contains("{timestamp}"));
        assert!(logger.path().exists());
    }

    #[test]
    fn test_logger_drop_flushes() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("drop_test.log");

        {
            let logger = EventLogger::with_file(&log_path).unwrap();
            logger.log_event(1, 5, Events::Destroy, false, false);
        }

        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("\"mutex_id\":5"));
    }
}
