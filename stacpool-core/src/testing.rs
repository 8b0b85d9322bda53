//! In-memory driver for tests
//!
//! Models just enough of a relational store to exercise the session
//! lifecycle: tables of unique keys, parent/child foreign keys, per-connection
//! transactions, plus fault injection and an event log.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::driver::{Connection, Driver};
use crate::error::{ConfigError, DriverError, SqlState};

/// What happened on a memory connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Connect,
    Ping,
    Begin,
    Commit,
    Rollback,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub connection_id: u64,
    pub kind: EventKind,
}

/// Driver for `memory://` connection strings. Clones share one store.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    tables: Mutex<BTreeMap<String, BTreeSet<String>>>,
    events: Mutex<Vec<Event>>,
    next_id: AtomicU64,
    /// Connections with an id at or below this are dead
    dead_up_to: AtomicU64,
    open: AtomicUsize,
    peak: AtomicUsize,
    fail_connect: AtomicBool,
    fail_rollback: AtomicBool,
    fail_commit: Mutex<Option<String>>,
    /// Time the server takes to answer, per statement kind
    delays: Mutex<Vec<(EventKind, Duration)>>,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn record(&self, connection_id: u64, kind: EventKind) {
        locked(&self.events).push(Event {
            connection_id,
            kind,
        });
    }

    async fn stall(&self, kind: EventKind) {
        let delay = locked(&self.delays)
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed keys of a table, sorted
    pub fn committed(&self, table: &str) -> Vec<String> {
        locked(&self.shared.tables)
            .get(table)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<Event> {
        locked(&self.shared.events).clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        locked(&self.shared.events)
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    /// Physical connections currently open
    pub fn open_connections(&self) -> usize {
        self.shared.open.load(Ordering::Acquire)
    }

    /// Highest number of simultaneously open connections seen
    pub fn peak_connections(&self) -> usize {
        self.shared.peak.load(Ordering::Acquire)
    }

    /// Make every existing connection fail pings and statements
    pub fn kill_connections(&self) {
        let last = self.shared.next_id.load(Ordering::Acquire);
        self.shared.dead_up_to.store(last, Ordering::Release);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.shared.fail_connect.store(fail, Ordering::Release);
    }

    pub fn set_fail_rollback(&self, fail: bool) {
        self.shared.fail_rollback.store(fail, Ordering::Release);
    }

    /// Make commits fail with the given SQLSTATE (`None` to clear)
    pub fn set_fail_commit(&self, code: Option<&str>) {
        *locked(&self.shared.fail_commit) = code.map(str::to_string);
    }

    /// Make the server take `delay` to answer `kind` statements (`None` to clear).
    ///
    /// Begin and rollback stall after the statement reached the server, so a
    /// caller that gives up mid-wait leaves the connection inside a transaction.
    pub fn set_delay(&self, kind: EventKind, delay: Option<Duration>) {
        let mut delays = locked(&self.shared.delays);
        delays.retain(|(k, _)| *k != kind);
        if let Some(delay) = delay {
            delays.push((kind, delay));
        }
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    type Options = String;
    type Conn = MemoryConn;

    fn parse(&self, connection_string: &str) -> Result<String, ConfigError> {
        match connection_string.strip_prefix("memory://") {
            Some(name) if !name.is_empty() => Ok(name.to_string()),
            _ => Err(ConfigError::MalformedConnectionString {
                reason: format!("expected memory://<name>, got '{}'", connection_string),
            }),
        }
    }

    async fn connect(&self, _options: &String) -> Result<MemoryConn, DriverError> {
        if self.shared.fail_connect.load(Ordering::Acquire) {
            return Err(DriverError::Connection("connection refused".to_string()));
        }
        let id = self.shared.next_id.fetch_add(1, Ordering::AcqRel) + 1;
        let open = self.shared.open.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.peak.fetch_max(open, Ordering::AcqRel);
        self.shared.record(id, EventKind::Connect);

        Ok(MemoryConn {
            id,
            shared: Arc::clone(&self.shared),
            pending: Vec::new(),
            in_transaction: false,
        })
    }
}

/// Connection to the memory store
pub struct MemoryConn {
    id: u64,
    shared: Arc<Shared>,
    pending: Vec<(String, String)>,
    in_transaction: bool,
}

impl MemoryConn {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// A transaction was begun and not yet committed or rolled back
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn alive(&self) -> Result<(), DriverError> {
        if self.id <= self.shared.dead_up_to.load(Ordering::Acquire) {
            return Err(DriverError::Connection(
                "server closed the connection unexpectedly".to_string(),
            ));
        }
        Ok(())
    }

    fn has_key(&self, table: &str, key: &str) -> bool {
        let committed = locked(&self.shared.tables)
            .get(table)
            .is_some_and(|keys| keys.contains(key));
        committed || self.pending.iter().any(|(t, k)| t == table && k == key)
    }

    /// Insert a unique key into `table`
    pub fn insert(&mut self, table: &str, key: &str) -> Result<(), DriverError> {
        self.alive()?;
        if self.has_key(table, key) {
            return Err(DriverError::database(
                SqlState::UNIQUE_VIOLATION,
                format!("duplicate key value violates unique constraint \"{table}_pkey\""),
            ));
        }
        self.pending.push((table.to_string(), key.to_string()));
        Ok(())
    }

    /// Insert a key that references `parent_table.parent_key`
    pub fn insert_child(
        &mut self,
        table: &str,
        key: &str,
        parent_table: &str,
        parent_key: &str,
    ) -> Result<(), DriverError> {
        self.alive()?;
        if !self.has_key(parent_table, parent_key) {
            return Err(DriverError::database(
                SqlState::FOREIGN_KEY_VIOLATION,
                format!(
                    "insert or update on table \"{table}\" violates foreign key constraint \"{table}_{parent_table}_fkey\""
                ),
            ));
        }
        self.insert(table, key)
    }

    pub fn exists(&self, table: &str, key: &str) -> Result<bool, DriverError> {
        self.alive()?;
        Ok(self.has_key(table, key))
    }

    /// Statement the server rejects with a code the classifier does not map
    pub fn execute_invalid(&mut self) -> Result<(), DriverError> {
        self.alive()?;
        Err(DriverError::database(
            "42601",
            "syntax error at or near \"SELEC\"",
        ))
    }
}

#[async_trait]
impl Connection for MemoryConn {
    async fn ping(&mut self) -> Result<(), DriverError> {
        self.shared.record(self.id, EventKind::Ping);
        self.shared.stall(EventKind::Ping).await;
        self.alive()
    }

    async fn begin(&mut self) -> Result<(), DriverError> {
        self.alive()?;
        if self.in_transaction {
            return Err(DriverError::database(
                "25001",
                "there is already a transaction in progress",
            ));
        }
        self.shared.record(self.id, EventKind::Begin);
        self.pending.clear();
        self.in_transaction = true;
        self.shared.stall(EventKind::Begin).await;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.alive()?;
        if let Some(code) = locked(&self.shared.fail_commit).clone() {
            return Err(DriverError::database(&code, "commit rejected"));
        }
        self.shared.record(self.id, EventKind::Commit);
        let mut tables = locked(&self.shared.tables);
        for (table, key) in self.pending.drain(..) {
            tables.entry(table).or_default().insert(key);
        }
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        if self.shared.fail_rollback.load(Ordering::Acquire) {
            return Err(DriverError::Connection("rollback failed".to_string()));
        }
        self.alive()?;
        self.shared.stall(EventKind::Rollback).await;
        self.shared.record(self.id, EventKind::Rollback);
        self.pending.clear();
        self.in_transaction = false;
        Ok(())
    }
}

impl Drop for MemoryConn {
    fn drop(&mut self) {
        self.shared.open.fetch_sub(1, Ordering::AcqRel);
        self.shared.record(self.id, EventKind::Close);
    }
}
