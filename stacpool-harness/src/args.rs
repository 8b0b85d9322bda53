//! `stacpool load` arguments and entry point

use std::io::IsTerminal;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::instrument;

use crate::harness::{ExitPolicy, Harness, HarnessConfig, Strategy};
use crate::probe::{HttpProbe, REQUEST_TIMEOUT_SECS};
use crate::target::{self, ReleaseLevel};

/// Load subcommand arguments
#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Deployment to target
    #[arg(short = 'l', long, value_enum, default_value_t = ReleaseLevel::Dev)]
    pub release_level: ReleaseLevel,

    /// Number of bursts
    #[arg(short = 'r', long, default_value_t = 15)]
    pub repeat: u32,

    /// Seconds to wait between bursts
    #[arg(short = 's', long, default_value_t = 1.0)]
    pub sleep: f64,

    /// Dispatch strategy
    #[arg(long, value_enum, default_value_t = Mode::Concurrent)]
    pub mode: Mode,

    /// Requests in flight at once (concurrent mode)
    #[arg(short = 'w', long, default_value_t = default_workers())]
    pub workers: usize,

    /// Base URL overriding the release level host (e.g. http://localhost:8080)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = REQUEST_TIMEOUT_SECS)]
    pub request_timeout: u64,

    /// Exit with status 1 when any non-200 response was observed
    #[arg(long)]
    pub fail_on_anomaly: bool,

    /// Suppress the progress bar
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// One request at a time
    Sequential,
    /// Bounded worker pool, bursts may overlap
    Concurrent,
}

/// Same default as a thread-pool executor sized for I/O: cpus + 4, capped at 32
pub fn default_workers() -> usize {
    (num_cpus::get() + 4).min(32)
}

impl LoadArgs {
    pub fn strategy(&self) -> Strategy {
        match self.mode {
            Mode::Sequential => Strategy::Sequential,
            Mode::Concurrent => Strategy::WorkerPool {
                workers: self.workers,
            },
        }
    }

    pub fn exit_policy(&self) -> ExitPolicy {
        if self.fail_on_anomaly {
            ExitPolicy::FailOnAnomaly
        } else {
            ExitPolicy::Informational
        }
    }

    pub fn delay(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.sleep)
            .with_context(|| format!("invalid --sleep value: {}", self.sleep))
    }
}

/// Progress bar over all planned requests (hidden when quiet or not a TTY)
fn progress_bar(total: u64, quiet: bool) -> Option<ProgressBar> {
    if quiet || !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .ok()?
        .progress_chars("=> ");
    pb.set_style(style);
    Some(pb)
}

/// Run the load harness; returns the process exit code
#[instrument(skip_all, fields(release_level = ?args.release_level, mode = ?args.mode))]
pub async fn run_load(args: LoadArgs) -> Result<i32> {
    let base = target::base_url(args.release_level, args.base_url.as_deref())?;
    let targets = target::targets(&base);
    let probe = HttpProbe::new(Duration::from_secs(args.request_timeout))?;

    let config = HarnessConfig {
        targets,
        repeat: args.repeat,
        delay: args.delay()?,
        strategy: args.strategy(),
        echo: true,
    };
    let mut harness = Harness::new(probe, config)?;
    if let Some(pb) = progress_bar(harness.planned_requests(), args.quiet) {
        harness = harness.with_progress(pb);
    }

    let report = harness.run().await;
    report.log_summary();
    Ok(args.exit_policy().exit_code(&report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        load: LoadArgs,
    }

    fn parse(args: &[&str]) -> LoadArgs {
        Cli::parse_from(std::iter::once("load").chain(args.iter().copied())).load
    }

    #[test]
    fn defaults() {
        let args = parse(&[]);
        assert_eq!(args.release_level, ReleaseLevel::Dev);
        assert_eq!(args.repeat, 15);
        assert_eq!(args.delay().unwrap(), Duration::from_secs(1));
        assert_eq!(args.exit_policy(), ExitPolicy::Informational);
        assert!(matches!(args.strategy(), Strategy::WorkerPool { workers } if workers >= 5));
    }

    #[test]
    fn short_flags() {
        let args = parse(&["-l", "prod", "-r", "3", "-s", "0.5"]);
        assert_eq!(args.release_level, ReleaseLevel::Prod);
        assert_eq!(args.repeat, 3);
        assert_eq!(args.delay().unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn sequential_mode_and_exit_policy() {
        let args = parse(&["--mode", "sequential", "--fail-on-anomaly"]);
        assert_eq!(args.strategy(), Strategy::Sequential);
        assert_eq!(args.exit_policy(), ExitPolicy::FailOnAnomaly);
    }

    #[test]
    fn negative_sleep_is_rejected() {
        let args = parse(&["--sleep=-1"]);
        assert!(args.delay().is_err());
    }

    #[test]
    fn default_workers_is_bounded() {
        let workers = default_workers();
        assert!((5..=32).contains(&workers));
    }
}
