//! Probe trait and implementations
//!
//! - [`HttpProbe`]: real GET requests via reqwest
//! - [`MockProbe`]: scripted status codes for tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::HarnessError;

/// Default per-request timeout in seconds
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Why a request produced no status code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("{0}")]
    Transport(String),
}

/// One GET against a target, yielding the response status
#[async_trait]
pub trait Probe: Send + Sync {
    async fn get(&self, url: &Url) -> Result<u16, ProbeError>;
}

/// Probe backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, HarnessError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stacpool/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn get(&self, url: &Url) -> Result<u16, ProbeError> {
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout {
                    seconds: self.timeout.as_secs(),
                }
            } else {
                ProbeError::Transport(e.without_url().to_string())
            }
        })?;
        Ok(response.status().as_u16())
    }
}

/// Probe that replays queued results, then answers 200
#[derive(Default)]
pub struct MockProbe {
    responses: Mutex<VecDeque<Result<u16, ProbeError>>>,
    calls: Mutex<Vec<Url>>,
}

impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a result for the next request
    pub fn push(&self, result: Result<u16, ProbeError>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
    }

    /// URLs requested so far, in dispatch order
    pub fn calls(&self) -> Vec<Url> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Probe for MockProbe {
    async fn get(&self, url: &Url) -> Result<u16, ProbeError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.clone());
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(Ok(200))
    }
}
