use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("invalid base URL {url:?}: {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("base URL must be http or https, got {0}")]
    UnsupportedScheme(String),

    #[error("worker count must be at least 1")]
    NoWorkers,

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
