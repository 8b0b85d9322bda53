//! Driver seam between the engine and a concrete database client
//!
//! The engine only needs to open, probe and close connections and to drive
//! transaction boundaries. Everything else (queries, row mapping) happens
//! inside session bodies against the concrete connection type.

use async_trait::async_trait;

use crate::error::{ConfigError, DriverError};

/// One physical database connection
#[async_trait]
pub trait Connection: Send + 'static {
    /// Cheap liveness probe (e.g. `SELECT 1`)
    async fn ping(&mut self) -> Result<(), DriverError>;

    async fn begin(&mut self) -> Result<(), DriverError>;

    async fn commit(&mut self) -> Result<(), DriverError>;

    async fn rollback(&mut self) -> Result<(), DriverError>;
}

/// Factory for connections to one kind of database
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Parsed, validated connection target
    type Options: Clone + Send + Sync + 'static;
    type Conn: Connection;

    /// Validate a connection string without connecting
    fn parse(&self, connection_string: &str) -> Result<Self::Options, ConfigError>;

    async fn connect(&self, options: &Self::Options) -> Result<Self::Conn, DriverError>;
}

/// Connection string with any password replaced, for logs.
///
/// Strings that do not parse as URLs are returned as `<unparsed>` so a
/// malformed DSN carrying a secret never reaches the log.
pub fn redact(connection_string: &str) -> String {
    match url::Url::parse(connection_string) {
        Ok(mut url) => {
            if url.password().is_some() {
                // set_password only fails for cannot-be-a-base URLs
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<unparsed>".to_string(),
    }
}
