use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lockgraph::{Detector, DetectorConfig, Replayer};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "lockgraph - lock-order deadlock detector")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a JSON-lines trace of lock events and print every report
    Replay {
        /// Path to the trace, `-` for stdin
        trace: PathBuf,

        /// Refuse mutexes beyond this many live ones
        #[arg(long)]
        max_mutexes: Option<usize>,

        /// Locks tracked per thread at once
        #[arg(long, default_value_t = 64)]
        max_held_locks: usize,

        /// Write the event log to this file
        #[cfg(feature = "logging")]
        #[arg(long)]
        log: Option<PathBuf>,

        /// Exit with status 2 if any report was produced
        #[arg(long)]
        fail_on_report: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Replay {
            trace,
            max_mutexes,
            max_held_locks,
            #[cfg(feature = "logging")]
            log,
            fail_on_report,
        } => {
            let mut config = DetectorConfig::new().max_held_locks(max_held_locks);
            if let Some(capacity) = max_mutexes {
                config = config.max_mutexes(capacity);
            }
            #[allow(unused_mut)]
            let mut detector = Detector::new(config);

            #[cfg(feature = "logging")]
            if let Some(path) = log {
                let logger =
                    lockgraph::EventLogger::with_file(path).context("Failed to initialize logger")?;
                detector = detector.with_logger(logger);
            }

            let mut replayer = Replayer::new(detector);
            let stdout = io::stdout().lock();
            let summary = if trace.as_os_str() == "-" {
                replayer.run(io::stdin().lock(), stdout)?
            } else {
                let file = File::open(&trace)
                    .with_context(|| format!("Failed to open trace {}", trace.display()))?;
                replayer.run(BufReader::new(file), stdout)?
            };

            #[cfg(feature = "logging")]
            replayer.detector().flush_log()?;

            eprintln!(
                "{} events, {} threads, {} mutexes, {} edges, {} reports",
                summary.events, summary.threads, summary.mutexes, summary.edges, summary.reports
            );
            if fail_on_report && summary.reports > 0 {
                std::process::exit(2);
            }
            Ok(())
        }
    }
}
