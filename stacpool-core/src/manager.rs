//! Reader/writer session manager
//!
//! Built once at startup and handed to request handlers (usually inside the
//! application state). Cloning is cheap: both engines are shared.

use futures::future::BoxFuture;

use crate::config::Settings;
use crate::driver::Driver;
use crate::engine::{build_engine, Engine, Role};
use crate::error::{ConfigError, DriverError, SessionResult};
use crate::postgres::PgDriver;
use crate::session::{Session, SessionFactory};

/// Session manager for the PostgreSQL driver
pub type PgSessionManager = SessionManager<PgDriver>;

/// Holds one reader engine and one writer engine for the process lifetime
pub struct SessionManager<D: Driver> {
    reader: SessionFactory<D>,
    writer: SessionFactory<D>,
}

impl<D: Driver> Clone for SessionManager<D> {
    fn clone(&self) -> Self {
        Self {
            reader: self.reader.clone(),
            writer: self.writer.clone(),
        }
    }
}

impl<D: Driver + Clone> SessionManager<D> {
    /// Build both engines from settings.
    ///
    /// Both connection strings are checked before either engine is built.
    pub fn new(driver: D, settings: &Settings) -> Result<Self, ConfigError> {
        let reader_url = settings.reader_connection_string()?;
        let writer_url = settings.writer_connection_string()?;

        let reader = build_engine(driver.clone(), reader_url, settings.pool.clone(), Role::Reader)?;
        let writer = build_engine(driver, writer_url, settings.pool.clone(), Role::Writer)?;

        Ok(Self {
            reader: SessionFactory::new(reader),
            writer: SessionFactory::new(writer),
        })
    }

    /// Build from `READER_CONN_STRING` / `WRITER_CONN_STRING` and pool env vars
    pub fn from_env(driver: D) -> Result<Self, ConfigError> {
        Self::new(driver, &Settings::from_env()?)
    }
}

impl<D: Driver> SessionManager<D> {
    pub fn reader(&self) -> &Engine<D> {
        self.reader.engine()
    }

    pub fn writer(&self) -> &Engine<D> {
        self.writer.engine()
    }

    pub fn engine(&self, role: Role) -> &Engine<D> {
        match role {
            Role::Reader => self.reader(),
            Role::Writer => self.writer(),
        }
    }

    /// Run `body` in a scoped session on the reader engine
    pub async fn with_reader_session<T, F>(&self, body: F) -> SessionResult<T>
    where
        F: for<'s> FnOnce(&'s mut Session<D>) -> BoxFuture<'s, Result<T, DriverError>>,
    {
        self.reader.scoped(body).await
    }

    /// Run `body` in a scoped session on the writer engine
    pub async fn with_writer_session<T, F>(&self, body: F) -> SessionResult<T>
    where
        F: for<'s> FnOnce(&'s mut Session<D>) -> BoxFuture<'s, Result<T, DriverError>>,
    {
        self.writer.scoped(body).await
    }

    /// Open and ping one connection on each engine
    pub async fn check_reachable(&self) -> Result<(), (Role, DriverError)> {
        for role in [Role::Reader, Role::Writer] {
            self.engine(role)
                .check_reachable()
                .await
                .map_err(|e| (role, e))?;
        }
        Ok(())
    }

    /// Close both engines (process shutdown)
    pub fn close(&self) {
        self.reader().close();
        self.writer().close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, READER_CONN_STRING, WRITER_CONN_STRING};
    use crate::error::SessionError;
    use crate::testing::MemoryDriver;

    fn settings(reader: Option<&str>, writer: Option<&str>) -> Settings {
        Settings::from_lookup(|name| match name {
            READER_CONN_STRING => reader.map(str::to_string),
            WRITER_CONN_STRING => writer.map(str::to_string),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn missing_writer_fails_fast() {
        let err = SessionManager::new(MemoryDriver::new(), &settings(Some("memory://r"), None))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ConfigError::Missing {
                name: WRITER_CONN_STRING
            }
        ));
    }

    #[test]
    fn missing_reader_fails_fast() {
        let err = SessionManager::new(MemoryDriver::new(), &settings(None, Some("memory://w")))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ConfigError::Missing {
                name: READER_CONN_STRING
            }
        ));
    }

    #[test]
    fn engines_carry_their_roles() {
        let manager =
            SessionManager::new(MemoryDriver::new(), &settings(Some("memory://r"), Some("memory://w")))
                .unwrap();
        assert_eq!(manager.reader().role(), Role::Reader);
        assert_eq!(manager.writer().role(), Role::Writer);
        assert_eq!(manager.reader().endpoint(), "memory://r");
        assert_eq!(manager.writer().config(), &PoolConfig::default());
    }

    #[tokio::test]
    async fn writes_are_visible_to_reader_sessions() {
        let driver = MemoryDriver::new();
        let manager =
            SessionManager::new(driver.clone(), &settings(Some("memory://r"), Some("memory://w")))
                .unwrap();

        manager
            .with_writer_session(|s| {
                Box::pin(async move {
                    s.connection().await?.insert("collections", "sentinel-2")?;
                    Ok(())
                })
            })
            .await
            .unwrap();

        let found = manager
            .with_reader_session(|s| {
                Box::pin(async move { s.connection().await?.exists("collections", "sentinel-2") })
            })
            .await
            .unwrap();
        assert!(found);

        assert_eq!(manager.reader().stats().checkouts, 1);
        assert_eq!(manager.writer().stats().checkouts, 1);
    }

    #[tokio::test]
    async fn reader_and_writer_pools_are_independent() {
        let driver = MemoryDriver::new();
        let mut s = settings(Some("memory://r"), Some("memory://w"));
        s.pool = PoolConfig::new()
            .with_pool_size(1)
            .with_max_overflow(0)
            .with_timeout_seconds(0);
        let manager = SessionManager::new(driver, &s).unwrap();

        let _held = manager.writer().checkout().await.unwrap();

        let err = manager
            .with_writer_session(|_s| Box::pin(async move { Ok(()) }))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::PoolExhausted { .. }));

        manager
            .with_reader_session(|_s| Box::pin(async move { Ok(()) }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn check_reachable_reports_the_failing_role() {
        let driver = MemoryDriver::new();
        let manager =
            SessionManager::new(driver.clone(), &settings(Some("memory://r"), Some("memory://w")))
                .unwrap();

        manager.check_reachable().await.unwrap();

        manager.close();
        let (role, err) = manager.check_reachable().await.unwrap_err();
        assert_eq!(role, Role::Reader);
        assert!(matches!(err, DriverError::EngineClosed));
    }
}
