//! Burst dispatch
//!
//! A run is `repeat` bursts. Each burst issues one GET per target; the delay
//! separates bursts. [`Strategy::Sequential`] waits for every response before
//! moving on. [`Strategy::WorkerPool`] queues the whole burst on a bounded set
//! of workers and starts the delay immediately, so bursts overlap whenever
//! responses are slower than the delay.

use std::sync::Arc;
use std::time::Duration;

use indicatif::ProgressBar;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::HarnessError;
use crate::observation::{Observation, ObservationLog, Report};
use crate::probe::Probe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Strategy {
    /// One request at a time
    Sequential,
    /// Up to `workers` requests in flight
    WorkerPool { workers: usize },
}

/// What a finished run means for the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ExitPolicy {
    /// Always exit 0; anomalies are reported, not judged
    #[default]
    Informational,
    /// Exit 1 when any anomaly was recorded
    FailOnAnomaly,
}

impl ExitPolicy {
    pub fn exit_code(&self, report: &Report) -> i32 {
        match self {
            Self::Informational => 0,
            Self::FailOnAnomaly if report.has_anomalies() => 1,
            Self::FailOnAnomaly => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub targets: Vec<Url>,
    pub repeat: u32,
    pub delay: Duration,
    pub strategy: Strategy,
    /// Print each anomaly to stdout as it is observed
    pub echo: bool,
}

pub struct Harness<P> {
    probe: Arc<P>,
    config: HarnessConfig,
    progress: Option<ProgressBar>,
}

impl<P: Probe + 'static> Harness<P> {
    pub fn new(probe: P, config: HarnessConfig) -> Result<Self, HarnessError> {
        Self::with_shared_probe(Arc::new(probe), config)
    }

    pub fn with_shared_probe(probe: Arc<P>, config: HarnessConfig) -> Result<Self, HarnessError> {
        if let Strategy::WorkerPool { workers: 0 } = config.strategy {
            return Err(HarnessError::NoWorkers);
        }
        Ok(Self {
            probe,
            config,
            progress: None,
        })
    }

    /// Tick `progress` once per observation
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Total requests a run will issue
    pub fn planned_requests(&self) -> u64 {
        u64::from(self.config.repeat) * self.config.targets.len() as u64
    }

    pub async fn run(&self) -> Report {
        let log = Arc::new(ObservationLog::new());
        info!(
            strategy = ?self.config.strategy,
            repeat = self.config.repeat,
            targets = self.config.targets.len(),
            delay_ms = self.config.delay.as_millis() as u64,
            "Running"
        );

        match self.config.strategy {
            Strategy::Sequential => self.run_sequential(&log).await,
            Strategy::WorkerPool { workers } => self.run_worker_pool(workers, &log).await,
        }

        if let Some(pb) = &self.progress {
            pb.finish_and_clear();
        }
        info!("Done");
        Report::from_observations(log.snapshot())
    }

    async fn run_sequential(&self, log: &ObservationLog) {
        for burst in 0..self.config.repeat {
            debug!(burst, "dispatching burst");
            for url in &self.config.targets {
                let observation = observe(self.probe.as_ref(), url).await;
                self.record(log, observation);
            }
            self.pause_after(burst).await;
        }
    }

    async fn run_worker_pool(&self, workers: usize, log: &Arc<ObservationLog>) {
        let slots = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();

        for burst in 0..self.config.repeat {
            debug!(burst, workers, "queueing burst");
            for url in &self.config.targets {
                let slots = Arc::clone(&slots);
                let probe = Arc::clone(&self.probe);
                let log = Arc::clone(log);
                let progress = self.progress.clone();
                let echo = self.config.echo;
                let url = url.clone();

                tasks.spawn(async move {
                    let Ok(_permit) = slots.acquire_owned().await else {
                        return;
                    };
                    let observation = observe(probe.as_ref(), &url).await;
                    record(&log, observation, echo, progress.as_ref());
                });
            }
            self.pause_after(burst).await;
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "request task failed");
            }
        }
    }

    fn record(&self, log: &ObservationLog, observation: Observation) {
        record(log, observation, self.config.echo, self.progress.as_ref());
    }

    async fn pause_after(&self, burst: u32) {
        if burst + 1 < self.config.repeat && !self.config.delay.is_zero() {
            tokio::time::sleep(self.config.delay).await;
        }
    }
}

async fn observe<P: Probe + ?Sized>(probe: &P, url: &Url) -> Observation {
    let started = Instant::now();
    let result = probe.get(url).await;
    Observation::from_result(url.as_str(), result, started.elapsed())
}

fn record(log: &ObservationLog, observation: Observation, echo: bool, progress: Option<&ProgressBar>) {
    if observation.is_anomaly() {
        debug!(url = %observation.url, status = ?observation.status, "anomaly");
        if echo {
            match progress {
                Some(pb) => pb.suspend(|| println!("{observation}")),
                None => println!("{observation}"),
            }
        }
    }
    if let Some(pb) = progress {
        pb.inc(1);
    }
    log.record(observation);
}
