//! Error types for stacpool-core
//!
//! Three layers:
//! - [`ConfigError`]: startup problems (missing connection strings, bad pool sizing). Fatal.
//! - [`DriverError`]: raw failures reported by a [`Driver`](crate::driver::Driver) or the engine.
//! - [`SessionError`]: the classified, caller-facing taxonomy returned by scoped sessions.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Startup configuration error
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Required environment variable or settings key is absent
    #[error("missing required setting '{name}'")]
    Missing { name: &'static str },

    /// Connection string is empty or cannot be parsed by the driver
    #[error("malformed connection string: {reason}")]
    MalformedConnectionString { reason: String },

    /// Pool sizing or timing parameters violate an invariant
    #[error("invalid pool configuration: {reason}")]
    InvalidPool { reason: String },

    /// A setting is present but could not be parsed
    #[error("invalid value '{value}' for '{name}'")]
    InvalidValue { name: &'static str, value: String },

    /// Settings file could not be read
    #[error("failed to read settings file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Settings file is not valid TOML for the expected shape
    #[error("failed to parse settings file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Tagged decode of a database SQLSTATE code.
///
/// Only the codes the classifier cares about get their own variant; the rest
/// keep the raw five-character code for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlState {
    /// `23505` unique_violation
    UniqueViolation,
    /// `23503` foreign_key_violation
    ForeignKeyViolation,
    /// Any other code
    Other(String),
}

impl SqlState {
    pub const UNIQUE_VIOLATION: &'static str = "23505";
    pub const FOREIGN_KEY_VIOLATION: &'static str = "23503";

    pub fn from_code(code: &str) -> Self {
        match code {
            Self::UNIQUE_VIOLATION => Self::UniqueViolation,
            Self::FOREIGN_KEY_VIOLATION => Self::ForeignKeyViolation,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::UniqueViolation => Self::UNIQUE_VIOLATION,
            Self::ForeignKeyViolation => Self::FOREIGN_KEY_VIOLATION,
            Self::Other(code) => code,
        }
    }
}

impl std::fmt::Display for SqlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Raw failure from the driver or the engine, before classification
#[derive(Error, Debug)]
pub enum DriverError {
    /// The database rejected a statement
    #[error("database error [{code}]: {message}")]
    Database { code: SqlState, message: String },

    /// Connecting, or talking to an established connection, failed
    #[error("connection error: {0}")]
    Connection(String),

    /// No pool slot became free within the checkout timeout
    #[error("timed out after {waited:?} waiting for a pooled connection")]
    PoolTimedOut { waited: Duration },

    /// The engine was closed while waiting for a slot
    #[error("engine is closed")]
    EngineClosed,

    /// Anything else a session body reports
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DriverError {
    /// Build a database error from a raw SQLSTATE code
    pub fn database(code: &str, message: impl Into<String>) -> Self {
        Self::Database {
            code: SqlState::from_code(code),
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for DriverError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(db) => match db.code() {
                Some(code) => Self::database(&code, db.message()),
                None => Self::Other(anyhow::anyhow!(db.message().to_string())),
            },
            sqlx::Error::PoolTimedOut => Self::PoolTimedOut {
                waited: Duration::ZERO,
            },
            sqlx::Error::PoolClosed => Self::EngineClosed,
            sqlx::Error::Io(io) => Self::Connection(io.to_string()),
            sqlx::Error::Tls(tls) => Self::Connection(tls.to_string()),
            other => Self::Other(anyhow::Error::new(other)),
        }
    }
}

/// Classified error kind. Derived from an error, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Conflict,
    ForeignKeyViolation,
    PoolExhausted,
    UnclassifiedDatabaseError,
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Caller-facing error returned by scoped sessions.
///
/// Messages never carry raw driver diagnostics; those are logged at
/// classification time.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("resource already exists")]
    Conflict,

    #[error("referenced resource does not exist")]
    ForeignKeyViolation,

    #[error("no database connection available after {waited:?}")]
    PoolExhausted { waited: Duration },

    #[error("unhandled database error")]
    Database,

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

impl SessionError {
    /// Classification of this error, `None` for configuration errors
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Conflict => Some(ErrorKind::Conflict),
            Self::ForeignKeyViolation => Some(ErrorKind::ForeignKeyViolation),
            Self::PoolExhausted { .. } => Some(ErrorKind::PoolExhausted),
            Self::Database => Some(ErrorKind::UnclassifiedDatabaseError),
            Self::Configuration(_) => None,
        }
    }
}
