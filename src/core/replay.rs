//! Offline replay of recorded lock events
//!
//! A trace is a JSON-lines stream of events, one per line:
//!
//! ```json
//! {"thread": 1, "mutex": 4096, "op": "before_lock"}
//! {"thread": 1, "mutex": 4096, "op": "after_lock", "write": false, "trylock": true}
//! ```
//!
//! `write` defaults to `true` and `trylock` to `false`. Blank lines are
//! skipped. Each thread id gets its own [`ThreadContext`], so a whole
//! multi-threaded run can be checked after the fact on one thread.

use crate::core::detector::Detector;
use crate::core::report::DeadlockReport;
use crate::core::thread_state::ThreadContext;
use crate::core::types::{Events, MutexId, ThreadId};
use anyhow::{Context, Result};
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};

/// One line of a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub thread: ThreadId,
    pub mutex: MutexId,
    pub op: Events,
    #[serde(default = "default_write")]
    pub write: bool,
    #[serde(default)]
    pub trylock: bool,
}

fn default_write() -> bool {
    true
}

/// Counts gathered over a replay
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub events: usize,
    pub reports: usize,
    pub threads: usize,
    pub mutexes: usize,
    pub edges: usize,
}

/// Feeds trace events into a detector
pub struct Replayer {
    detector: Detector,
    threads: FxHashMap<ThreadId, ThreadContext>,
    events: usize,
    reports: usize,
}

impl Replayer {
    pub fn new(detector: Detector) -> Self {
        Replayer {
            detector,
            threads: FxHashMap::default(),
            events: 0,
            reports: 0,
        }
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    /// Apply one event
    ///
    /// # Returns
    /// The report the event produced, if any
    pub fn apply(&mut self, event: &TraceEvent) -> Option<DeadlockReport> {
        let ctx = self
            .threads
            .entry(event.thread)
            .or_insert_with(|| ThreadContext::new(event.thread));
        self.events += 1;

        let report = match event.op {
            Events::BeforeLock => self.detector.before_lock(ctx, event.mutex, event.write),
            Events::AfterLock => {
                self.detector
                    .after_lock(ctx, event.mutex, event.write, event.trylock)
            }
            Events::BeforeUnlock => {
                self.detector.before_unlock(ctx, event.mutex, event.write);
                None
            }
            Events::Destroy => {
                self.detector.destroy(ctx, event.mutex);
                None
            }
        };
        if report.is_some() {
            self.reports += 1;
        }
        report
    }

    /// Replay a JSON-lines trace, writing each report to `out` as one JSON line
    ///
    /// # Errors
    /// Returns an error on I/O failure or a line that is not a valid event;
    /// the error names the offending line.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, mut out: W) -> Result<ReplaySummary> {
        for (index, line) in input.lines().enumerate() {
            let line_no = index + 1;
            let line = line.with_context(|| format!("Failed to read line {line_no}"))?;
            if line.trim().is_empty() {
                continue;
            }
            let event: TraceEvent = serde_json::from_str(&line)
                .with_context(|| format!("Invalid event on line {line_no}"))?;
            if let Some(report) = self.apply(&event) {
                serde_json::to_writer(&mut out, &report).context("Failed to write report")?;
                writeln!(out).context("Failed to write report")?;
            }
        }
        out.flush().context("Failed to flush output")?;
        Ok(self.summary())
    }

    pub fn summary(&self) -> ReplaySummary {
        ReplaySummary {
            events: self.events,
            reports: self.reports,
            threads: self.threads.len(),
            mutexes: self.detector.mutex_count(),
            edges: self.detector.edge_count(),
        }
    }
}
