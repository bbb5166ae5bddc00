//! In-process driver.
//!
//! [`MemoryDriver`] never talks to a server. It records every statement it is
//! given in a journal shared by all of its handles and answers from canned
//! result sets, which makes pool behaviour observable in tests:
//!
//! ```rust
//! use sqlpro_core::memory::MemoryDriver;
//! use sqlpro_core::{ConnectParams, ServicePool, Value};
//!
//! let driver = MemoryDriver::new()
//!     .with_rows("SELECT 1", vec!["one"], vec![vec![Value::Int(1)]]);
//! let pool = ServicePool::with_size(driver.clone(), ConnectParams::new("test"), 1).unwrap();
//!
//! let one: Option<i64> = pool.submit_query_one("SELECT 1").wait().unwrap();
//! assert_eq!(one, Some(1));
//! assert_eq!(driver.statements(), vec!["SELECT 1"]);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::ConnectParams;
use crate::driver::Driver;
use crate::error::DriverError;
use crate::row::{Row, Value};

/// One statement seen by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// The handle that ran the statement, numbered from 0 in connect order.
    pub handle: usize,
    /// The statement text.
    pub sql: String,
}

#[derive(Debug, Default)]
struct State {
    journal: Vec<JournalEntry>,
    results: HashMap<String, Vec<Row>>,
    failures: HashMap<String, DriverError>,
    disconnects: HashSet<String>,
    latency: HashMap<String, Duration>,
    default_latency: Option<Duration>,
    connect_limit: Option<usize>,
    connects: usize,
    closed: usize,
}

/// A driver backed by process memory.
///
/// Clones share the same journal and canned results.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    state: Arc<Mutex<State>>,
}

/// An open [`MemoryDriver`] handle.
#[derive(Debug)]
pub struct MemoryHandle {
    id: usize,
    pending: Vec<Row>,
}

impl MemoryHandle {
    /// Connect-order number of the handle.
    pub fn id(&self) -> usize {
        self.id
    }
}

impl MemoryDriver {
    /// Create a driver that accepts every statement and returns no rows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `sql` with the given rows.
    pub fn with_rows<C, S>(self, sql: impl Into<String>, columns: C, rows: Vec<Vec<Value>>) -> Self
    where
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Arc<[String]> = columns.into_iter().map(Into::into).collect();
        let rows = rows
            .into_iter()
            .map(|values| Row::with_shared_columns(columns.clone(), values))
            .collect();
        self.state.lock().results.insert(sql.into(), rows);
        self
    }

    /// Fail `sql` with a server error.
    pub fn fail_on(self, sql: impl Into<String>, message: impl Into<String>, code: u32) -> Self {
        self.state
            .lock()
            .failures
            .insert(sql.into(), DriverError::new(message, code));
        self
    }

    /// Drop the link when `sql` runs.
    pub fn disconnect_on(self, sql: impl Into<String>) -> Self {
        self.state.lock().disconnects.insert(sql.into());
        self
    }

    /// Sleep for `delay` before answering `sql`.
    pub fn with_statement_latency(self, sql: impl Into<String>, delay: Duration) -> Self {
        self.state.lock().latency.insert(sql.into(), delay);
        self
    }

    /// Sleep for `delay` before answering every statement.
    pub fn with_latency(self, delay: Duration) -> Self {
        self.state.lock().default_latency = Some(delay);
        self
    }

    /// Refuse every connect after the first `count`.
    pub fn fail_connects_after(self, count: usize) -> Self {
        self.state.lock().connect_limit = Some(count);
        self
    }

    /// Every statement seen so far, in the order it ran.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.state.lock().journal.clone()
    }

    /// Statement texts seen so far, in the order they ran.
    pub fn statements(&self) -> Vec<String> {
        self.state
            .lock()
            .journal
            .iter()
            .map(|entry| entry.sql.clone())
            .collect()
    }

    /// Statement texts run by one handle.
    pub fn statements_for(&self, handle: usize) -> Vec<String> {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|entry| entry.handle == handle)
            .map(|entry| entry.sql.clone())
            .collect()
    }

    /// Forget the journal.
    pub fn clear_journal(&self) {
        self.state.lock().journal.clear();
    }

    /// Number of successful connects.
    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    /// Number of handles closed.
    pub fn closed_handles(&self) -> usize {
        self.state.lock().closed
    }
}

impl Driver for MemoryDriver {
    type Handle = MemoryHandle;

    fn connect(&self, params: &ConnectParams) -> Result<MemoryHandle, DriverError> {
        let mut state = self.state.lock();
        if state.connect_limit.is_some_and(|limit| state.connects >= limit) {
            return Err(DriverError::new(
                format!("Unknown database '{}'", params.database),
                1049,
            ));
        }
        let id = state.connects;
        state.connects += 1;
        Ok(MemoryHandle {
            id,
            pending: Vec::new(),
        })
    }

    fn execute(&self, handle: &mut MemoryHandle, sql: &str) -> Result<(), DriverError> {
        let delay = {
            let mut state = self.state.lock();
            state.journal.push(JournalEntry {
                handle: handle.id,
                sql: sql.to_string(),
            });
            state.latency.get(sql).copied().or(state.default_latency)
        };

        // Sleep without holding the lock so other handles keep running.
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let state = self.state.lock();
        if state.disconnects.contains(sql) {
            return Err(DriverError::disconnected("Lost connection to server during query"));
        }
        if let Some(err) = state.failures.get(sql) {
            return Err(err.clone());
        }
        handle.pending = state.results.get(sql).cloned().unwrap_or_default();
        Ok(())
    }

    fn fetch_rows(&self, handle: &mut MemoryHandle) -> Result<Vec<Row>, DriverError> {
        Ok(std::mem::take(&mut handle.pending))
    }

    fn close(&self, _handle: MemoryHandle) {
        self.state.lock().closed += 1;
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
