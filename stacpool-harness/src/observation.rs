//! Observation log and run report

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::probe::ProbeError;

/// One request outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observation {
    /// HTTP status, `None` when the request failed before a response
    pub status: Option<u16>,
    pub url: String,
    pub elapsed: Duration,
    /// Transport failure reason
    pub error: Option<String>,
}

impl Observation {
    pub fn from_result(url: &str, result: Result<u16, ProbeError>, elapsed: Duration) -> Self {
        match result {
            Ok(status) => Self {
                status: Some(status),
                url: url.to_string(),
                elapsed,
                error: None,
            },
            Err(e) => Self {
                status: None,
                url: url.to_string(),
                elapsed,
                error: Some(e.to_string()),
            },
        }
    }

    /// Anything other than a 200 response
    pub fn is_anomaly(&self) -> bool {
        self.status != Some(200)
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, &self.error) {
            (Some(status), _) => write!(f, "{}: {}", status, self.url),
            (None, Some(reason)) => write!(f, "error: {} ({})", self.url, reason),
            (None, None) => write!(f, "error: {}", self.url),
        }
    }
}

/// Append-only record of every observation in a run
#[derive(Debug, Default)]
pub struct ObservationLog {
    entries: Mutex<Vec<Observation>>,
}

impl ObservationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, observation: Observation) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(observation);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Observation> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn into_entries(self) -> Vec<Observation> {
        self.entries.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub total: usize,
    pub ok: usize,
    /// Non-200 responses plus transport failures
    pub anomalies: usize,
    pub transport_errors: usize,
    /// Response count per status code
    pub by_status: BTreeMap<u16, usize>,
    pub slowest: Duration,
    pub observations: Vec<Observation>,
}

impl Report {
    pub fn from_observations(observations: Vec<Observation>) -> Self {
        let mut report = Report {
            total: observations.len(),
            ..Default::default()
        };
        for obs in &observations {
            match obs.status {
                Some(status) => *report.by_status.entry(status).or_default() += 1,
                None => report.transport_errors += 1,
            }
            if obs.is_anomaly() {
                report.anomalies += 1;
            } else {
                report.ok += 1;
            }
            report.slowest = report.slowest.max(obs.elapsed);
        }
        report.observations = observations;
        report
    }

    pub fn has_anomalies(&self) -> bool {
        self.anomalies > 0
    }

    /// Anomalous observations in the order they were recorded
    pub fn anomalies(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter().filter(|o| o.is_anomaly())
    }

    /// Emit the summary as a tracing event
    pub fn log_summary(&self) {
        tracing::info!(
            total = self.total,
            ok = self.ok,
            anomalies = self.anomalies,
            transport_errors = self.transport_errors,
            slowest_ms = self.slowest.as_millis() as u64,
            by_status = ?self.by_status,
            "load run complete"
        );
    }
}
