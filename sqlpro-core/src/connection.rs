//! Exclusive-use backend connections.
//!
//! A [`Connection`] wraps one driver handle and a busy flag. The pool hands
//! a connection out by flipping the flag from free to locked in a single
//! compare-and-swap ([`Connection::try_acquire`]); the returned
//! [`PooledConnection`] guard flips it back when dropped, whether the task
//! that used it finished, failed or panicked.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::{ConnectParams, PoolConfig, RollbackPolicy};
use crate::driver::Driver;
use crate::error::{DriverError, SqlError, SqlResult};
use crate::row::{FromRow, Row};
use crate::transaction::{BEGIN, COMMIT, ROLLBACK, SqlTransaction};

/// One exclusive-use connection to the backend.
pub struct Connection<D: Driver> {
    id: usize,
    driver: Arc<D>,
    params: ConnectParams,
    /// `None` after a lost link until the handle is reopened.
    handle: Mutex<Option<D::Handle>>,
    locked: AtomicBool,
    closed: AtomicBool,
    rollback_policy: RollbackPolicy,
    slow_statement: Option<Duration>,
}

impl<D: Driver> Connection<D> {
    /// Open a connection.
    pub fn open(
        id: usize,
        driver: Arc<D>,
        params: ConnectParams,
        config: &PoolConfig,
    ) -> SqlResult<Self> {
        let handle = driver
            .connect(&params)
            .map_err(|source| SqlError::Setup { index: id, source })?;

        debug!(
            connection = id,
            driver = driver.name(),
            host = %params.host,
            database = %params.database,
            "Connection opened"
        );

        Ok(Self {
            id,
            driver,
            params,
            handle: Mutex::new(Some(handle)),
            locked: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            rollback_policy: config.rollback_policy,
            slow_statement: config.slow_statement(),
        })
    }

    /// Position of the connection in its pool.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The parameters used to open the connection.
    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    /// Run a statement.
    pub fn execute(&self, sql: &str) -> SqlResult<()> {
        self.with_handle(sql, |driver, handle| driver.execute(handle, sql))
    }

    /// Run a query and map every result row.
    pub fn query<T: FromRow>(&self, sql: &str) -> SqlResult<Vec<T>> {
        let rows = self.fetch(sql)?;
        let records = rows
            .iter()
            .map(T::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Run a query and map only its first row. Further rows are ignored.
    pub fn query_one<T: FromRow>(&self, sql: &str) -> SqlResult<Option<T>> {
        let rows = self.fetch(sql)?;
        let record = rows.first().map(T::from_row).transpose()?;
        Ok(record)
    }

    fn fetch(&self, sql: &str) -> SqlResult<Vec<Row>> {
        self.with_handle(sql, |driver, handle| {
            driver.execute(handle, sql)?;
            driver.fetch_rows(handle)
        })
    }

    /// Send `START TRANSACTION`. Failures are logged, not returned.
    pub fn begin_transaction(&self) {
        let _ = self.execute(BEGIN);
    }

    /// Send `COMMIT`. Failures are logged, not returned.
    pub fn commit_transaction(&self) {
        let _ = self.execute(COMMIT);
    }

    /// Send `ROLLBACK`. Failures are logged, not returned.
    pub fn rollback_transaction(&self) {
        let _ = self.execute(ROLLBACK);
    }

    /// Run a transaction.
    ///
    /// The handle stays locked from `START TRANSACTION` to the final
    /// `COMMIT` or `ROLLBACK`, so [`Connection::close`] waits for the whole
    /// transaction. If `START TRANSACTION` fails no statement runs and its
    /// error is returned.
    ///
    /// Statements run in order; the first failure triggers `ROLLBACK` and
    /// stops execution. A successful run ends with `COMMIT`; after a rollback
    /// `COMMIT` is only sent under [`RollbackPolicy::CommitAfterRollback`].
    pub fn execute_transaction(&self, transaction: SqlTransaction) -> SqlResult<()> {
        if transaction.is_empty() {
            return Err(SqlError::EmptyTransaction);
        }

        let mut slot = self.handle.lock();
        if let Err(e) = self.execute_on(&mut slot, BEGIN) {
            warn!(connection = self.id, error = %e, "Could not start transaction");
            return Err(e);
        }

        let mut failure = None;
        for (index, sql) in transaction.into_statements().iter().enumerate() {
            if let Err(e) = self.execute_on(&mut slot, sql) {
                warn!(connection = self.id, statement = index, "Rolling back transaction");
                let _ = self.execute_on(&mut slot, ROLLBACK);
                failure = Some(SqlError::transaction_failed(index, e));
                break;
            }
        }

        match failure {
            None => {
                let _ = self.execute_on(&mut slot, COMMIT);
                Ok(())
            }
            Some(err) => {
                if self.rollback_policy == RollbackPolicy::CommitAfterRollback {
                    let _ = self.execute_on(&mut slot, COMMIT);
                }
                Err(err)
            }
        }
    }

    /// Check if the connection is free. Does not claim it.
    pub fn is_free(&self) -> bool {
        !self.locked.load(Ordering::Acquire)
    }

    /// Claim the connection if it is free.
    ///
    /// Returns `true` if this call moved it from free to locked.
    pub fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark the connection busy.
    pub fn lock(&self) {
        self.locked.store(true, Ordering::Release);
    }

    /// Mark the connection free. No-op if it already is.
    pub fn unlock(&self) {
        let _ = self
            .locked
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Check if the driver handle has been shut down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reopen the driver handle with the stored parameters.
    pub fn reconnect(&self) -> SqlResult<()> {
        let mut slot = self.handle.lock();
        if self.is_closed() {
            return Err(SqlError::ConnectionClosed(self.id));
        }
        if let Some(old) = slot.take() {
            self.driver.close(old);
        }
        *slot = Some(self.driver.connect(&self.params)?);
        info!(connection = self.id, "Connection reopened");
        Ok(())
    }

    /// Shut the driver handle down. Later calls fail with
    /// [`SqlError::ConnectionClosed`].
    pub fn close(&self) {
        let mut slot = self.handle.lock();
        self.closed.store(true, Ordering::Release);
        if let Some(handle) = slot.take() {
            self.driver.close(handle);
            debug!(connection = self.id, "Connection closed");
        }
    }

    fn with_handle<R, F>(&self, sql: &str, f: F) -> SqlResult<R>
    where
        F: FnOnce(&D, &mut D::Handle) -> Result<R, DriverError>,
    {
        let mut slot = self.handle.lock();
        self.run_on(&mut slot, sql, f)
    }

    fn execute_on(&self, slot: &mut Option<D::Handle>, sql: &str) -> SqlResult<()> {
        self.run_on(slot, sql, |driver, handle| driver.execute(handle, sql))
    }

    /// Run `f` on the handle in `slot`. The caller holds the handle lock.
    fn run_on<R, F>(&self, slot: &mut Option<D::Handle>, sql: &str, f: F) -> SqlResult<R>
    where
        F: FnOnce(&D, &mut D::Handle) -> Result<R, DriverError>,
    {
        if self.is_closed() {
            return Err(SqlError::ConnectionClosed(self.id));
        }
        if slot.is_none() {
            if !self.params.auto_reconnect {
                return Err(SqlError::ConnectionClosed(self.id));
            }
            *slot = Some(self.driver.connect(&self.params)?);
            info!(connection = self.id, "Connection reopened");
        }
        let Some(handle) = slot.as_mut() else {
            return Err(SqlError::ConnectionClosed(self.id));
        };

        trace!(connection = self.id, sql = %sql, "Executing statement");
        let started = Instant::now();
        let result = f(&*self.driver, handle);
        let elapsed = started.elapsed();

        if let Some(threshold) = self.slow_statement {
            if elapsed > threshold {
                warn!(
                    connection = self.id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    sql = %sql,
                    "Slow statement"
                );
            }
        }

        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(connection = self.id, code = e.code, error = %e.message, "Statement failed");
                if e.disconnected {
                    if let Some(broken) = slot.take() {
                        self.driver.close(broken);
                    }
                    if self.params.auto_reconnect {
                        match self.driver.connect(&self.params) {
                            Ok(fresh) => {
                                *slot = Some(fresh);
                                info!(connection = self.id, "Connection reopened");
                            }
                            Err(re) => {
                                warn!(connection = self.id, error = %re, "Reconnect failed");
                            }
                        }
                    }
                }
                Err(e.into())
            }
        }
    }
}

impl<D: Driver> std::fmt::Debug for Connection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("free", &self.is_free())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// A connection claimed from the pool.
///
/// The connection is released when the guard is dropped.
pub struct PooledConnection<D: Driver> {
    conn: Arc<Connection<D>>,
}

impl<D: Driver> PooledConnection<D> {
    /// Wrap a connection that the caller has already locked.
    pub(crate) fn new(conn: Arc<Connection<D>>) -> Self {
        Self { conn }
    }

    /// Release the connection back to the pool.
    pub fn release(self) {}
}

impl<D: Driver> Deref for PooledConnection<D> {
    type Target = Connection<D>;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<D: Driver> Drop for PooledConnection<D> {
    fn drop(&mut self) {
        trace!(connection = self.conn.id, "Releasing connection");
        self.conn.unlock();
    }
}

impl<D: Driver> std::fmt::Debug for PooledConnection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.conn.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDriver;
    use crate::row::Value;
    use pretty_assertions::assert_eq;

    fn open(driver: &MemoryDriver, config: &PoolConfig) -> Connection<MemoryDriver> {
        Connection::open(0, Arc::new(driver.clone()), ConnectParams::new("test"), config).unwrap()
    }

    #[test]
    fn test_execute_records_statement() {
        let driver = MemoryDriver::new();
        let conn = open(&driver, &PoolConfig::default());
        conn.execute("INSERT INTO t VALUES (1)").unwrap();
        assert_eq!(driver.statements(), vec!["INSERT INTO t VALUES (1)"]);
    }

    #[test]
    fn test_execute_failure_carries_code() {
        let driver = MemoryDriver::new().fail_on("BAD", "syntax error", 1064);
        let conn = open(&driver, &PoolConfig::default());
        let err = conn.execute("BAD").unwrap_err();
        assert_eq!(err.driver_code(), Some(1064));
        assert!(err.to_string().contains("syntax error"));
    }

    #[test]
    fn test_query_maps_rows_in_order() {
        let driver = MemoryDriver::new().with_rows(
            "SELECT id FROM t",
            vec!["id"],
            vec![vec![Value::Int(3)], vec![Value::Int(1)], vec![Value::Int(2)]],
        );
        let conn = open(&driver, &PoolConfig::default());
        let ids: Vec<i64> = conn.query("SELECT id FROM t").unwrap();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn test_query_one_takes_first_row() {
        let driver = MemoryDriver::new().with_rows(
            "SELECT id FROM t",
            vec!["id"],
            vec![vec![Value::Int(10)], vec![Value::Int(20)]],
        );
        let conn = open(&driver, &PoolConfig::default());
        assert_eq!(conn.query_one::<i64>("SELECT id FROM t").unwrap(), Some(10));
        assert_eq!(conn.query_one::<i64>("SELECT nothing").unwrap(), None);
    }

    #[test]
    fn test_query_mapping_error() {
        let driver = MemoryDriver::new().with_rows(
            "SELECT name FROM t",
            vec!["name"],
            vec![vec![Value::Text("x".into())]],
        );
        let conn = open(&driver, &PoolConfig::default());
        let err = conn.query::<i64>("SELECT name FROM t").unwrap_err();
        assert!(matches!(err, SqlError::Mapping(_)));
    }

    #[test]
    fn test_transaction_commits_on_success() {
        let driver = MemoryDriver::new();
        let conn = open(&driver, &PoolConfig::default());
        conn.execute_transaction(SqlTransaction::with_statements(["A", "B"]))
            .unwrap();
        assert_eq!(
            driver.statements(),
            vec!["START TRANSACTION", "A", "B", "COMMIT"]
        );
    }

    #[test]
    fn test_transaction_rollback_skips_commit() {
        let driver = MemoryDriver::new().fail_on("B", "boom", 1);
        let conn = open(&driver, &PoolConfig::default());
        let err = conn
            .execute_transaction(SqlTransaction::with_statements(["A", "B", "C"]))
            .unwrap_err();

        assert!(matches!(err, SqlError::TransactionFailed { statement: 1, .. }));
        assert_eq!(
            driver.statements(),
            vec!["START TRANSACTION", "A", "B", "ROLLBACK"]
        );
    }

    #[test]
    fn test_transaction_commit_after_rollback() {
        let driver = MemoryDriver::new().fail_on("B", "boom", 1);
        let config = PoolConfig::new().rollback_policy(RollbackPolicy::CommitAfterRollback);
        let conn = open(&driver, &config);
        let result = conn.execute_transaction(SqlTransaction::with_statements(["A", "B", "C"]));

        assert!(result.is_err());
        assert_eq!(
            driver.statements(),
            vec!["START TRANSACTION", "A", "B", "ROLLBACK", "COMMIT"]
        );
    }

    #[test]
    fn test_transaction_stops_when_begin_fails() {
        let driver = MemoryDriver::new()
            .disconnect_on("START TRANSACTION")
            .fail_on("B", "boom", 1);
        let conn = open(&driver, &PoolConfig::default());
        let err = conn
            .execute_transaction(SqlTransaction::with_statements(["A", "B", "C"]))
            .unwrap_err();

        assert!(err.is_driver());
        assert!(!err.is_transaction_failure());
        assert_eq!(driver.statements(), vec!["START TRANSACTION"]);
        assert_eq!(driver.connects(), 2);
    }

    #[test]
    fn test_close_waits_for_running_transaction() {
        let driver = MemoryDriver::new().with_statement_latency("A", Duration::from_millis(40));
        let conn = Arc::new(open(&driver, &PoolConfig::default()));

        let runner = {
            let conn = conn.clone();
            std::thread::spawn(move || {
                conn.execute_transaction(SqlTransaction::with_statements(["A", "B"]))
            })
        };
        while !driver.statements().iter().any(|sql| sql == "A") {
            std::thread::yield_now();
        }
        conn.close();

        runner.join().unwrap().unwrap();
        assert_eq!(
            driver.statements(),
            vec!["START TRANSACTION", "A", "B", "COMMIT"]
        );
        assert!(matches!(
            conn.execute("SELECT 1"),
            Err(SqlError::ConnectionClosed(0))
        ));
    }

    #[test]
    fn test_empty_transaction_touches_nothing() {
        let driver = MemoryDriver::new();
        let conn = open(&driver, &PoolConfig::default());
        let err = conn.execute_transaction(SqlTransaction::new()).unwrap_err();
        assert!(matches!(err, SqlError::EmptyTransaction));
        assert!(driver.statements().is_empty());
    }

    #[test]
    fn test_lock_flags() {
        let driver = MemoryDriver::new();
        let conn = open(&driver, &PoolConfig::default());

        assert!(conn.is_free());
        assert!(conn.try_acquire());
        assert!(!conn.is_free());
        assert!(!conn.try_acquire());

        conn.unlock();
        conn.unlock();
        assert!(conn.is_free());

        conn.lock();
        conn.lock();
        assert!(!conn.is_free());
    }

    #[test]
    fn test_try_acquire_is_exclusive_across_threads() {
        let driver = MemoryDriver::new();
        let conn = Arc::new(open(&driver, &PoolConfig::default()));

        let winners: usize = (0..8)
            .map(|_| {
                let conn = conn.clone();
                std::thread::spawn(move || conn.try_acquire())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap() as usize)
            .sum();

        assert_eq!(winners, 1);
    }

    #[test]
    fn test_pooled_connection_releases_on_drop() {
        let driver = MemoryDriver::new();
        let conn = Arc::new(open(&driver, &PoolConfig::default()));
        assert!(conn.try_acquire());

        let guard = PooledConnection::new(conn.clone());
        assert!(!conn.is_free());
        drop(guard);
        assert!(conn.is_free());
    }

    #[test]
    fn test_closed_connection_rejects_statements() {
        let driver = MemoryDriver::new();
        let conn = open(&driver, &PoolConfig::default());
        conn.close();
        conn.close();

        assert!(matches!(
            conn.execute("SELECT 1"),
            Err(SqlError::ConnectionClosed(0))
        ));
        assert!(conn.reconnect().is_err());
        assert_eq!(driver.closed_handles(), 1);
    }

    #[test]
    fn test_auto_reconnect_after_lost_link() {
        let driver = MemoryDriver::new().disconnect_on("KILL");
        let conn = open(&driver, &PoolConfig::default());

        let err = conn.execute("KILL").unwrap_err();
        assert!(err.is_driver());
        assert_eq!(driver.connects(), 2);

        conn.execute("SELECT 1").unwrap();
    }

    #[test]
    fn test_no_reconnect_when_disabled() {
        let driver = MemoryDriver::new().disconnect_on("KILL");
        let conn = Connection::open(
            0,
            Arc::new(driver.clone()),
            ConnectParams::new("test").auto_reconnect(false),
            &PoolConfig::default(),
        )
        .unwrap();

        assert!(conn.execute("KILL").is_err());
        assert!(matches!(
            conn.execute("SELECT 1"),
            Err(SqlError::ConnectionClosed(0))
        ));
        assert_eq!(driver.connects(), 1);
    }

    #[test]
    fn test_open_failure_is_setup_error() {
        let driver = MemoryDriver::new().fail_connects_after(0);
        let err = Connection::open(
            4,
            Arc::new(driver),
            ConnectParams::new("test"),
            &PoolConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SqlError::Setup { index: 4, .. }));
    }
}
