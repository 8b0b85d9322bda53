//! Transactional sessions and the scoped session lifecycle
//!
//! A [`Session`] moves through `Created → Active → {Committed, RolledBack} → Closed`.
//! It owns at most one pooled connection and gives it back when closed or
//! dropped, whatever happened before.
//!
//! [`with_session`] is the scoped form used by request handlers: begin, run the
//! body once, commit or roll back, classify failures, release.

use std::fmt;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::classify::into_session_error;
use crate::driver::{Connection, Driver};
use crate::engine::{Engine, PooledConnection, Role};
use crate::error::{DriverError, SessionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Active,
    Committed,
    RolledBack,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Produces sessions bound to one engine
pub struct SessionFactory<D: Driver> {
    engine: Engine<D>,
}

impl<D: Driver> Clone for SessionFactory<D> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<D: Driver> SessionFactory<D> {
    pub fn new(engine: Engine<D>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Engine<D> {
        &self.engine
    }

    /// New session in the `Created` state. No connection is checked out yet.
    pub fn new_session(&self) -> Session<D> {
        Session {
            id: Uuid::new_v4(),
            engine: self.engine.clone(),
            conn: None,
            state: SessionState::Created,
        }
    }

    /// Run `body` inside a scoped session on this factory's engine
    pub async fn scoped<T, F>(&self, body: F) -> SessionResult<T>
    where
        F: for<'s> FnOnce(&'s mut Session<D>) -> BoxFuture<'s, Result<T, DriverError>>,
    {
        let mut session = self.new_session();

        // A checkout timeout surfaces here, before the session ever becomes Active.
        if let Err(e) = session.begin().await {
            return Err(into_session_error(e));
        }

        let result = match body(&mut session).await {
            Ok(value) => match session.commit().await {
                Ok(()) => Ok(value),
                Err(e) => {
                    session.rollback_after_failure().await;
                    Err(into_session_error(e))
                }
            },
            Err(e) => {
                session.rollback_after_failure().await;
                Err(into_session_error(e))
            }
        };

        session.close();
        result
    }
}

/// Run `body` in a transactional session on `engine`.
///
/// The body runs exactly once. On success the transaction is committed; on
/// any failure it is rolled back and the error is classified. The connection
/// is returned on every path, including a failing rollback and cancellation
/// of the returned future.
///
/// ```ignore
/// let count = with_session(&engine, |session| Box::pin(async move {
///     let conn = session.connection().await?;
///     let row: (i64,) = sqlx::query_as("SELECT count(*) FROM collections")
///         .fetch_one(&mut **conn)
///         .await?;
///     Ok(row.0)
/// }))
/// .await?;
/// ```
pub async fn with_session<D, T, F>(engine: &Engine<D>, body: F) -> SessionResult<T>
where
    D: Driver,
    F: for<'s> FnOnce(&'s mut Session<D>) -> BoxFuture<'s, Result<T, DriverError>>,
{
    SessionFactory::new(engine.clone()).scoped(body).await
}

/// One unit of work on one pooled connection
pub struct Session<D: Driver> {
    id: Uuid,
    engine: Engine<D>,
    conn: Option<PooledConnection<D>>,
    state: SessionState,
}

impl<D: Driver> Session<D> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.engine.role()
    }

    /// Check out a connection and open a transaction.
    ///
    /// No-op when already active.
    pub async fn begin(&mut self) -> Result<(), DriverError> {
        match self.state {
            SessionState::Created => {}
            SessionState::Active => return Ok(()),
            state => {
                return Err(DriverError::Other(anyhow::anyhow!(
                    "cannot begin a session that is {state}"
                )))
            }
        }

        let mut conn = self.engine.checkout().await?;
        // Closed on drop until BEGIN is acknowledged
        conn.discard();
        conn.begin().await?;
        conn.retain();

        tracing::trace!(
            session = %self.id,
            role = %self.role(),
            connection_id = conn.id(),
            "session active"
        );
        self.conn = Some(conn);
        self.state = SessionState::Active;
        Ok(())
    }

    /// The session's connection, checking one out on first use
    pub async fn connection(&mut self) -> Result<&mut D::Conn, DriverError> {
        if self.state == SessionState::Created {
            self.begin().await?;
        }
        let state = self.state;
        match self.conn.as_mut() {
            Some(conn) if state == SessionState::Active => Ok(&mut **conn),
            _ => Err(DriverError::Other(anyhow::anyhow!(
                "session is {state}, no connection available"
            ))),
        }
    }

    /// Commit the transaction.
    ///
    /// On failure the session stays `Active` so the caller can roll back.
    pub async fn commit(&mut self) -> Result<(), DriverError> {
        match self.state {
            // Nothing was ever checked out, so there is nothing to commit.
            SessionState::Created => {
                self.state = SessionState::Committed;
                Ok(())
            }
            SessionState::Active => {
                if let Some(conn) = self.conn.as_mut() {
                    conn.commit().await?;
                }
                self.state = SessionState::Committed;
                tracing::trace!(session = %self.id, "session committed");
                Ok(())
            }
            state => Err(DriverError::Other(anyhow::anyhow!(
                "cannot commit a session that is {state}"
            ))),
        }
    }

    /// Roll the transaction back.
    ///
    /// The session ends `RolledBack` even when the rollback itself fails; the
    /// connection is then discarded instead of pooled.
    pub async fn rollback(&mut self) -> Result<(), DriverError> {
        match self.state {
            SessionState::Created => {
                self.state = SessionState::RolledBack;
                Ok(())
            }
            SessionState::Active => {
                // Still Active while waiting, so a cancelled rollback discards
                let result = match self.conn.as_mut() {
                    Some(conn) => {
                        let result = conn.rollback().await;
                        if result.is_err() {
                            conn.discard();
                        }
                        result
                    }
                    None => Ok(()),
                };
                self.state = SessionState::RolledBack;
                if result.is_ok() {
                    tracing::trace!(session = %self.id, "session rolled back");
                }
                result
            }
            state => Err(DriverError::Other(anyhow::anyhow!(
                "cannot roll back a session that is {state}"
            ))),
        }
    }

    async fn rollback_after_failure(&mut self) {
        if let Err(e) = self.rollback().await {
            tracing::warn!(
                session = %self.id,
                role = %self.role(),
                error = %e,
                "rollback failed, discarding connection"
            );
        }
    }

    /// Release the connection and end the session
    pub fn close(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        if self.state == SessionState::Active {
            // Dropped mid-transaction (cancelled future or panic). The
            // transaction state is unknown, so the connection is not reused;
            // closing it makes the server roll back.
            tracing::warn!(
                session = %self.id,
                role = %self.role(),
                "session dropped while active, discarding connection"
            );
            if let Some(conn) = self.conn.as_mut() {
                conn.discard();
            }
            self.state = SessionState::RolledBack;
        }

        drop(self.conn.take());
        self.state = SessionState::Closed;
        tracing::trace!(session = %self.id, "session closed");
    }
}

impl<D: Driver> Drop for Session<D> {
    fn drop(&mut self) {
        self.finish();
    }
}
