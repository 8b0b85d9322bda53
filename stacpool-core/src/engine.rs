//! Pooled connection engine
//!
//! An [`Engine`] owns every physical connection to one endpoint:
//! - at most `pool_size + max_overflow` connections exist at once (one semaphore permit each)
//! - up to `pool_size` connections stay idle between checkouts; extra ones are closed on return
//! - idle connections older than `recycle_seconds` are replaced at checkout
//! - with `pre_ping`, idle connections are probed and silently replaced when dead
//!
//! Checkout is the only blocking operation. It waits at most `timeout_seconds`
//! for a free slot and then fails with [`DriverError::PoolTimedOut`].

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::config::PoolConfig;
use crate::driver::{redact, Connection, Driver};
use crate::error::{ConfigError, DriverError};

/// Which side of a reader/writer deployment an engine serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Reader,
    Writer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reader => "reader",
            Self::Writer => "writer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build an engine bound to one endpoint.
///
/// Validates the pool configuration and parses the connection string; no
/// connection is opened until the first checkout.
pub fn build_engine<D: Driver>(
    driver: D,
    connection_string: &str,
    config: PoolConfig,
    role: Role,
) -> Result<Engine<D>, ConfigError> {
    config.validate()?;
    if connection_string.trim().is_empty() {
        return Err(ConfigError::MalformedConnectionString {
            reason: format!("{} connection string is empty", role),
        });
    }
    let options = driver.parse(connection_string)?;
    let endpoint = redact(connection_string);

    tracing::info!(
        %role,
        %endpoint,
        pool_size = config.pool_size,
        max_overflow = config.max_overflow,
        recycle_seconds = config.recycle_seconds,
        timeout_seconds = config.timeout_seconds,
        pre_ping = config.pre_ping,
        "engine created"
    );

    Ok(Engine {
        inner: Arc::new(EngineInner {
            role,
            endpoint,
            slots: Arc::new(Semaphore::new(config.capacity())),
            idle: Mutex::new(Vec::with_capacity(config.pool_size as usize)),
            open: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            stats: AtomicEngineStats::default(),
            config,
            driver,
            options,
        }),
    })
}

/// Bounded pool of connections to one database endpoint.
///
/// Cheap to clone; clones share the same pool.
pub struct Engine<D: Driver> {
    inner: Arc<EngineInner<D>>,
}

impl<D: Driver> Clone for Engine<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct EngineInner<D: Driver> {
    role: Role,
    endpoint: String,
    config: PoolConfig,
    driver: D,
    options: D::Options,
    /// One permit per allowed physical connection
    slots: Arc<Semaphore>,
    /// LIFO stack of idle connections
    idle: Mutex<Vec<IdleConn<D::Conn>>>,
    /// Physical connections currently open (idle + checked out)
    open: AtomicUsize,
    next_id: AtomicU64,
    stats: AtomicEngineStats,
}

struct IdleConn<C> {
    conn: C,
    id: u64,
    created_at: Instant,
}

impl<D: Driver> Engine<D> {
    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Connection string with the password redacted
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Reserve a connection for exclusive use.
    ///
    /// Waits up to `timeout_seconds` for a free slot. The connection goes
    /// back to the engine when the returned guard is dropped.
    pub async fn checkout(&self) -> Result<PooledConnection<D>, DriverError> {
        let started = Instant::now();
        let timeout = self.inner.config.timeout();
        let slots = Arc::clone(&self.inner.slots);

        let permit = match tokio::time::timeout(timeout, slots.acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(DriverError::EngineClosed),
            Err(_) => {
                let waited = started.elapsed();
                self.inner.stats.exhausted.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    role = %self.inner.role,
                    capacity = self.inner.config.capacity(),
                    waited_ms = waited.as_millis() as u64,
                    "connection pool exhausted"
                );
                return Err(DriverError::PoolTimedOut { waited });
            }
        };

        // Dropping `permit` on any error below frees the slot.
        let entry = self.take_idle_or_connect().await?;
        self.inner.stats.checkouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            role = %self.inner.role,
            connection_id = entry.id,
            waited_ms = started.elapsed().as_millis() as u64,
            "connection checked out"
        );

        Ok(PooledConnection {
            entry: Some(entry),
            permit: Some(permit),
            engine: Arc::clone(&self.inner),
            discard: false,
        })
    }

    async fn take_idle_or_connect(&self) -> Result<IdleConn<D::Conn>, DriverError> {
        let inner: &EngineInner<D> = &self.inner;
        loop {
            let popped = inner.idle_stack().pop();
            let Some(entry) = popped else { break };
            let id = entry.id;
            let age = entry.created_at.elapsed();
            // Closed properly if rejected below or if checkout is cancelled mid-ping
            let mut candidate = Candidate {
                inner,
                entry: Some(entry),
            };

            if let Some(max_age) = inner.config.recycle() {
                if age >= max_age {
                    inner.stats.recycled.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        role = %inner.role,
                        connection_id = id,
                        "recycling connection past max age"
                    );
                    continue;
                }
            }

            if inner.config.pre_ping {
                let pinged = match candidate.entry.as_mut() {
                    Some(entry) => entry.conn.ping().await,
                    None => Ok(()),
                };
                if let Err(e) = pinged {
                    inner.stats.ping_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        role = %inner.role,
                        connection_id = id,
                        error = %e,
                        "pre-ping failed, replacing connection"
                    );
                    continue;
                }
            }

            if let Some(entry) = candidate.entry.take() {
                return Ok(entry);
            }
        }

        let conn = inner.driver.connect(&inner.options).await?;
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        inner.open.fetch_add(1, Ordering::AcqRel);
        inner.stats.created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(role = %inner.role, connection_id = id, "opened new connection");

        Ok(IdleConn {
            conn,
            id,
            created_at: Instant::now(),
        })
    }

    /// Open (or reuse) one connection and ping it
    pub async fn check_reachable(&self) -> Result<(), DriverError> {
        let mut conn = self.checkout().await?;
        if let Err(e) = conn.ping().await {
            conn.discard();
            return Err(e);
        }
        Ok(())
    }

    /// Snapshot of slot usage
    pub fn status(&self) -> EngineStatus {
        let capacity = self.inner.config.capacity();
        let available = self.inner.slots.available_permits();
        EngineStatus {
            role: self.inner.role,
            open: self.inner.open.load(Ordering::Acquire),
            idle: self.inner.idle_stack().len(),
            in_use: capacity.saturating_sub(available),
            available,
            capacity,
        }
    }

    pub fn stats(&self) -> EngineStats {
        self.inner.stats.snapshot()
    }

    /// Stop handing out connections and close the idle ones.
    ///
    /// Checked-out connections are closed when returned; pending checkouts
    /// fail with [`DriverError::EngineClosed`].
    pub fn close(&self) {
        self.inner.slots.close();
        let drained: Vec<_> = self.inner.idle_stack().drain(..).collect();
        for entry in drained {
            self.inner.close(entry);
        }
        tracing::info!(role = %self.inner.role, "engine closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.slots.is_closed()
    }
}

impl<D: Driver> EngineInner<D> {
    fn idle_stack(&self) -> std::sync::MutexGuard<'_, Vec<IdleConn<D::Conn>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self, entry: IdleConn<D::Conn>) {
        drop(entry.conn);
        self.open.fetch_sub(1, Ordering::AcqRel);
        self.stats.closed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(role = %self.role, connection_id = entry.id, "connection closed");
    }

    /// Return a connection: keep it idle if the base pool has room, close it otherwise
    fn release(&self, entry: IdleConn<D::Conn>) {
        if self.slots.is_closed() {
            self.close(entry);
            return;
        }

        let mut idle = self.idle_stack();
        if idle.len() < self.config.pool_size as usize {
            tracing::trace!(role = %self.role, connection_id = entry.id, "connection returned");
            idle.push(entry);
        } else {
            drop(idle);
            tracing::debug!(
                role = %self.role,
                connection_id = entry.id,
                "closing overflow connection"
            );
            self.close(entry);
        }
    }
}

/// Idle connection popped for checkout; closed on drop unless taken
struct Candidate<'a, D: Driver> {
    inner: &'a EngineInner<D>,
    entry: Option<IdleConn<D::Conn>>,
}

impl<D: Driver> Drop for Candidate<'_, D> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.inner.close(entry);
        }
    }
}

/// A connection checked out of an [`Engine`].
///
/// Dropping the guard returns the connection and frees its slot. A guard
/// marked with [`discard`](Self::discard) closes the connection instead.
pub struct PooledConnection<D: Driver> {
    entry: Option<IdleConn<D::Conn>>,
    permit: Option<OwnedSemaphorePermit>,
    engine: Arc<EngineInner<D>>,
    discard: bool,
}

impl<D: Driver> PooledConnection<D> {
    pub fn id(&self) -> u64 {
        self.entry.as_ref().map_or(0, |e| e.id)
    }

    pub fn age(&self) -> Duration {
        self.entry
            .as_ref()
            .map_or(Duration::ZERO, |e| e.created_at.elapsed())
    }

    /// Close this connection on release instead of pooling it
    pub fn discard(&mut self) {
        self.discard = true;
    }

    /// Undo [`discard`](Self::discard)
    pub(crate) fn retain(&mut self) {
        self.discard = false;
    }
}

impl<D: Driver> Deref for PooledConnection<D> {
    type Target = D::Conn;

    fn deref(&self) -> &D::Conn {
        match &self.entry {
            Some(entry) => &entry.conn,
            // entry is only taken in Drop
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<D: Driver> DerefMut for PooledConnection<D> {
    fn deref_mut(&mut self) -> &mut D::Conn {
        match &mut self.entry {
            Some(entry) => &mut entry.conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<D: Driver> Drop for PooledConnection<D> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            if self.discard {
                self.engine.close(entry);
            } else {
                self.engine.release(entry);
            }
        }
        // Free the slot only after the connection is back in the idle stack
        // (or closed), so a waiter never sees a slot without a connection.
        drop(self.permit.take());
    }
}

/// Point-in-time slot usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub role: Role,
    /// Physical connections open (idle + in use)
    pub open: usize,
    /// Idle connections ready for reuse
    pub idle: usize,
    /// Slots held by checked-out connections
    pub in_use: usize,
    /// Slots a checkout can take without waiting
    pub available: usize,
    /// `pool_size + max_overflow`
    pub capacity: usize,
}

impl EngineStatus {
    pub fn is_saturated(&self) -> bool {
        self.available == 0
    }
}

/// Counters accumulated since the engine was built
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub connections_created: u64,
    pub connections_closed: u64,
    pub checkouts: u64,
    /// Checkouts that timed out waiting for a slot
    pub exhausted: u64,
    /// Connections replaced for exceeding `recycle_seconds`
    pub recycled: u64,
    /// Connections replaced after a failed pre-ping
    pub ping_failures: u64,
}

#[derive(Debug, Default)]
struct AtomicEngineStats {
    created: AtomicU64,
    closed: AtomicU64,
    checkouts: AtomicU64,
    exhausted: AtomicU64,
    recycled: AtomicU64,
    ping_failures: AtomicU64,
}

impl AtomicEngineStats {
    fn snapshot(&self) -> EngineStats {
        EngineStats {
            connections_created: self.created.load(Ordering::Relaxed),
            connections_closed: self.closed.load(Ordering::Relaxed),
            checkouts: self.checkouts.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            recycled: self.recycled.load(Ordering::Relaxed),
            ping_failures: self.ping_failures.load(Ordering::Relaxed),
        }
    }
}
