//! Fixed-size connection pool with worker threads and async dispatch.
//!
//! A [`ServicePool`] owns `size` connections and `size` worker threads that
//! consume one shared [`TaskQueue`]. Submissions bind a free connection on
//! the caller's thread, queue a task that runs the statement on it and hand
//! back a [`TaskHandle`]. When every connection is busy the submission is
//! rejected on the spot with [`SqlError::Saturated`]; nothing is queued
//! without a connection bound to it.
//!
//! ```rust
//! use sqlpro_core::memory::MemoryDriver;
//! use sqlpro_core::{ConnectParams, ServicePool, SqlTransaction};
//!
//! let pool = ServicePool::builder(MemoryDriver::new())
//!     .params(ConnectParams::new("app"))
//!     .size(2)
//!     .build()
//!     .unwrap();
//!
//! pool.submit_execute("CREATE TABLE t (id INT)").wait().unwrap();
//! pool.submit_transaction(SqlTransaction::with_statements([
//!     "INSERT INTO t VALUES (1)",
//!     "INSERT INTO t VALUES (2)",
//! ]))
//! .wait()
//! .unwrap();
//!
//! pool.shutdown();
//! ```

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{ConnectParams, PoolConfig, RollbackPolicy};
use crate::connection::{Connection, PooledConnection};
use crate::driver::Driver;
use crate::error::{SqlError, SqlResult};
use crate::queue::TaskQueue;
use crate::row::FromRow;
use crate::task::{Task, TaskHandle, completion};
use crate::transaction::SqlTransaction;

/// State shared between the pool and its workers.
struct Shared {
    queue: TaskQueue<Task>,
    stop: AtomicBool,
    submitted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

/// A fixed-size pool of connections served by worker threads.
pub struct ServicePool<D: Driver> {
    connections: RwLock<Vec<Arc<Connection<D>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<Shared>,
    closed: AtomicBool,
    size: usize,
    config: PoolConfig,
}

impl<D: Driver> ServicePool<D> {
    /// Create a pool.
    ///
    /// Opens `config.size` connections and starts as many workers. If any
    /// connection fails to open, the ones already opened are closed and the
    /// error is returned.
    pub fn new(driver: D, params: ConnectParams, config: PoolConfig) -> SqlResult<Self> {
        config.validate()?;

        let size = config.size;
        let driver = Arc::new(driver);

        info!(
            size,
            driver = driver.name(),
            host = %params.host,
            database = %params.database,
            "Creating connection pool"
        );

        let mut connections = Vec::with_capacity(size);
        for index in 0..size {
            match Connection::open(index, driver.clone(), params.clone(), &config) {
                Ok(conn) => connections.push(Arc::new(conn)),
                Err(e) => {
                    error!(index, error = %e, "Failed to open connection");
                    for conn in &connections {
                        conn.close();
                    }
                    return Err(e);
                }
            }
        }

        let pool = Self {
            connections: RwLock::new(connections),
            workers: Mutex::new(Vec::with_capacity(size)),
            shared: Arc::new(Shared {
                queue: TaskQueue::new(),
                stop: AtomicBool::new(false),
                submitted: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                panicked: AtomicU64::new(0),
            }),
            closed: AtomicBool::new(false),
            size,
            config,
        };

        // A spawn failure drops `pool`, which shuts the started workers down.
        for index in 0..size {
            let shared = pool.shared.clone();
            let worker = thread::Builder::new()
                .name(format!("{}-{}", pool.config.worker_name, index))
                .spawn(move || run_worker(index, shared))?;
            pool.workers.lock().push(worker);
        }

        Ok(pool)
    }

    /// Create a pool of `size` connections with default settings.
    pub fn with_size(driver: D, params: ConnectParams, size: usize) -> SqlResult<Self> {
        Self::new(driver, params, PoolConfig::new().size(size))
    }

    /// Create a builder for a pool.
    pub fn builder(driver: D) -> ServicePoolBuilder<D> {
        ServicePoolBuilder::new(driver)
    }

    /// Claim a free connection.
    ///
    /// Returns `None` at once if every connection is busy.
    pub fn acquire(&self) -> Option<PooledConnection<D>> {
        let connections = self.connections.read();
        connections
            .iter()
            .find(|conn| conn.try_acquire())
            .map(|conn| PooledConnection::new(conn.clone()))
    }

    /// Run a statement on a worker.
    pub fn submit_execute(&self, sql: impl Into<String>) -> TaskHandle<()> {
        let sql = sql.into();
        self.dispatch(move |conn| conn.execute(&sql))
    }

    /// Run a query on a worker and map every row.
    pub fn submit_query<T>(&self, sql: impl Into<String>) -> TaskHandle<Vec<T>>
    where
        T: FromRow + Send + 'static,
    {
        let sql = sql.into();
        self.dispatch(move |conn| conn.query(&sql))
    }

    /// Run a query on a worker and map its first row.
    pub fn submit_query_one<T>(&self, sql: impl Into<String>) -> TaskHandle<Option<T>>
    where
        T: FromRow + Send + 'static,
    {
        let sql = sql.into();
        self.dispatch(move |conn| conn.query_one(&sql))
    }

    /// Run a transaction on a worker.
    pub fn submit_transaction(&self, transaction: SqlTransaction) -> TaskHandle<()> {
        self.dispatch(move |conn| conn.execute_transaction(transaction))
    }

    fn dispatch<T, F>(&self, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection<D>) -> SqlResult<T> + Send + 'static,
    {
        if self.is_shutdown() {
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            return TaskHandle::rejected(SqlError::PoolClosed);
        }

        let Some(conn) = self.acquire() else {
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            // A concurrent shutdown empties the connection set.
            if self.is_shutdown() {
                return TaskHandle::rejected(SqlError::PoolClosed);
            }
            warn!(size = self.size, "No free connection, rejecting task");
            return TaskHandle::rejected(SqlError::saturated(self.size));
        };

        let (completer, handle) = completion();
        let task: Task = Box::new(move || {
            let result = work(&*conn);
            // Free the connection before the caller can observe the result.
            conn.release();
            completer.complete(result);
        });

        if self.shared.queue.push(task).is_err() {
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            return TaskHandle::rejected(SqlError::PoolClosed);
        }
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        handle
    }

    /// Shut the pool down.
    ///
    /// Closes every connection, discards queued tasks (their handles resolve
    /// to [`SqlError::Aborted`]) and joins the workers. A statement already
    /// running finishes first. Later calls do nothing.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(size = self.size, "Shutting down connection pool");

        {
            let mut connections = self.connections.write();
            for conn in connections.iter() {
                conn.close();
            }
            connections.clear();
        }

        let discarded = self.shared.queue.cancel();
        self.shared.stop.store(true, Ordering::Release);

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("Worker thread terminated abnormally");
            }
        }

        debug!(discarded, "Connection pool shut down");
    }

    /// Number of connections the pool was built with.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of connections not claimed by a task.
    pub fn idle_connections(&self) -> usize {
        self.connections
            .read()
            .iter()
            .filter(|conn| conn.is_free())
            .count()
    }

    /// Number of tasks waiting for a worker.
    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.len()
    }

    /// Check if [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The pool settings.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Snapshot of the dispatch counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            panicked: self.shared.panicked.load(Ordering::Relaxed),
        }
    }
}

impl<D: Driver> Drop for ServicePool<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<D: Driver> std::fmt::Debug for ServicePool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServicePool")
            .field("size", &self.size)
            .field("idle", &self.idle_connections())
            .field("pending", &self.pending_tasks())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn run_worker(index: usize, shared: Arc<Shared>) {
    debug!(worker = index, "Worker started");

    while let Some(task) = shared.queue.pop() {
        if shared.stop.load(Ordering::Acquire) {
            break;
        }
        match catch_unwind(AssertUnwindSafe(task)) {
            Ok(()) => {
                shared.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                shared.panicked.fetch_add(1, Ordering::Relaxed);
                error!(
                    worker = index,
                    panic = panic_message(payload.as_ref()),
                    "Task panicked"
                );
            }
        }
    }

    debug!(worker = index, "Worker exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

/// Dispatch counters of a [`ServicePool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks queued for a worker.
    pub submitted: u64,
    /// Submissions turned away, saturated or after shutdown.
    pub rejected: u64,
    /// Tasks that ran to the end, whatever their result.
    pub completed: u64,
    /// Tasks that panicked on their worker.
    pub panicked: u64,
}

/// Builder for [`ServicePool`].
#[derive(Debug)]
pub struct ServicePoolBuilder<D: Driver> {
    driver: D,
    params: Option<ConnectParams>,
    url: Option<String>,
    config: PoolConfig,
}

impl<D: Driver> ServicePoolBuilder<D> {
    /// Create a builder for a pool over `driver`.
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            params: None,
            url: None,
            config: PoolConfig::default(),
        }
    }

    /// Set the connection parameters.
    pub fn params(mut self, params: ConnectParams) -> Self {
        self.params = Some(params);
        self
    }

    /// Set the connection parameters from a URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Replace all pool settings.
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of connections and workers.
    pub fn size(mut self, size: usize) -> Self {
        self.config.size = size;
        self
    }

    /// Set the rollback policy.
    pub fn rollback_policy(mut self, policy: RollbackPolicy) -> Self {
        self.config.rollback_policy = policy;
        self
    }

    /// Set the worker thread name prefix.
    pub fn worker_name(mut self, name: impl Into<String>) -> Self {
        self.config.worker_name = name.into();
        self
    }

    /// Log statements slower than `threshold`.
    pub fn slow_statement_threshold(mut self, threshold: Duration) -> Self {
        self.config = self.config.slow_statement_threshold(threshold);
        self
    }

    /// Build the pool.
    pub fn build(self) -> SqlResult<ServicePool<D>> {
        let params = match (self.params, self.url) {
            (Some(params), _) => params,
            (None, Some(url)) => ConnectParams::from_url(url)?,
            (None, None) => return Err(SqlError::config("connection parameters are required")),
        };
        ServicePool::new(self.driver, params, self.config)
    }
}
