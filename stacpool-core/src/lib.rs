//! stacpool-core: pooled database engines and scoped sessions
//!
//! - [`Engine`]: bounded connection pool (base size + overflow, recycle, pre-ping, checkout timeout)
//! - [`Session`] / [`with_session`]: transactional unit of work with guaranteed release
//! - [`classify`]: SQLSTATE-based error classification
//! - [`SessionManager`]: one reader engine and one writer engine per process
//!
//! ```ignore
//! let manager = PgSessionManager::from_env(PgDriver)?;
//!
//! let names = manager
//!     .with_reader_session(|s| Box::pin(async move {
//!         let conn = s.connection().await?;
//!         let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM collections")
//!             .fetch_all(&mut **conn)
//!             .await?;
//!         Ok(rows)
//!     }))
//!     .await?;
//! ```

pub mod classify;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod http;
pub mod manager;
pub mod postgres;
pub mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use classify::{classify, into_session_error};
pub use config::{PoolConfig, Settings};
pub use driver::{Connection, Driver};
pub use engine::{build_engine, Engine, EngineStats, EngineStatus, PooledConnection, Role};
pub use error::{ConfigError, DriverError, ErrorKind, SessionError, SessionResult, SqlState};
pub use manager::{PgSessionManager, SessionManager};
pub use postgres::{PgConn, PgDriver};
pub use session::{with_session, Session, SessionFactory, SessionState};
