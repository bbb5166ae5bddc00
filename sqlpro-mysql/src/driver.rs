//! [`Driver`] implementation on `mysql_async`.
//!
//! Pool workers are plain threads, so the driver owns a small tokio runtime
//! and blocks on it for every call.

use std::future::Future;
use std::thread;
use std::time::Duration;

use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder};
use sqlpro_core::{ConnectParams, Driver, DriverError, Row, SqlResult};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, warn};

use crate::error::to_driver_error;
use crate::types::from_mysql_rows;

/// An open MySQL connection plus the rows of its last statement.
pub struct MysqlHandle {
    conn: Conn,
    pending: Vec<mysql_async::Row>,
}

impl MysqlHandle {
    /// Connection id assigned by the server.
    pub fn connection_id(&self) -> u32 {
        self.conn.id()
    }
}

impl std::fmt::Debug for MysqlHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlHandle")
            .field("connection_id", &self.conn.id())
            .field("pending_rows", &self.pending.len())
            .finish()
    }
}

/// MySQL driver.
pub struct MysqlDriver {
    runtime: Option<Runtime>,
}

impl MysqlDriver {
    /// Create a driver with its own I/O runtime.
    pub fn new() -> SqlResult<Self> {
        Self::with_io_threads(1)
    }

    /// Create a driver whose runtime uses `threads` I/O threads.
    pub fn with_io_threads(threads: usize) -> SqlResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads.max(1))
            .thread_name("sqlpro-mysql-io")
            .enable_all()
            .build()?;
        Ok(Self {
            runtime: Some(runtime),
        })
    }

    fn block_on<F>(&self, future: F) -> Result<F::Output, DriverError>
    where
        F: Future + Send,
        F::Output: Send,
    {
        let Some(runtime) = self.runtime.as_ref() else {
            return Err(DriverError::disconnected("driver runtime has shut down"));
        };

        // `block_on` panics inside a runtime; hop onto a helper thread there.
        if Handle::try_current().is_ok() {
            thread::scope(|scope| match scope.spawn(|| runtime.block_on(future)).join() {
                Ok(output) => Ok(output),
                Err(panic) => std::panic::resume_unwind(panic),
            })
        } else {
            Ok(runtime.block_on(future))
        }
    }
}

/// Build `mysql_async` options from connection parameters.
pub fn opts_from_params(params: &ConnectParams) -> Result<Opts, DriverError> {
    if !params
        .charset
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(DriverError::new(
            format!("invalid charset '{}'", params.charset),
            0,
        ));
    }

    let mut builder = OptsBuilder::default()
        .db_name(Some(params.database.as_str()))
        .init(vec![
            format!("SET NAMES {}", params.charset),
            "SET autocommit = 1".to_string(),
        ]);

    if params.is_local_socket() {
        // Without a path the client asks the server for `@@socket`.
        builder = builder
            .ip_or_hostname("localhost")
            .socket(params.socket.as_deref())
            .prefer_socket(true);
    } else {
        builder = builder
            .ip_or_hostname(params.host.as_str())
            .tcp_port(params.port);
        if let Some(socket) = params.socket.as_deref() {
            builder = builder.socket(Some(socket)).prefer_socket(true);
        }
    }

    if let Some(user) = params.user.as_deref() {
        builder = builder.user(Some(user));
    }
    if let Some(password) = params.password.as_deref() {
        builder = builder.pass(Some(password));
    }

    Ok(Opts::from(builder))
}

async fn open(opts: Opts, timeout: Option<Duration>) -> Result<Conn, DriverError> {
    let connecting = Conn::new(opts);
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, connecting).await {
            Ok(result) => result,
            Err(_) => {
                return Err(DriverError::disconnected(format!(
                    "connect timed out after {}ms",
                    limit.as_millis()
                )));
            }
        },
        None => connecting.await,
    };
    result.map_err(to_driver_error)
}

impl Driver for MysqlDriver {
    type Handle = MysqlHandle;

    fn connect(&self, params: &ConnectParams) -> Result<MysqlHandle, DriverError> {
        let opts = opts_from_params(params)?;
        let conn = self.block_on(open(opts, params.connect_timeout))??;
        debug!(
            connection_id = conn.id(),
            charset = %params.charset,
            "MySQL connection established"
        );
        Ok(MysqlHandle {
            conn,
            pending: Vec::new(),
        })
    }

    fn execute(&self, handle: &mut MysqlHandle, sql: &str) -> Result<(), DriverError> {
        let conn = &mut handle.conn;
        let rows = self
            .block_on(conn.query::<mysql_async::Row, _>(sql))?
            .map_err(to_driver_error)?;
        handle.pending = rows;
        Ok(())
    }

    fn fetch_rows(&self, handle: &mut MysqlHandle) -> Result<Vec<Row>, DriverError> {
        Ok(from_mysql_rows(std::mem::take(&mut handle.pending)))
    }

    fn close(&self, handle: MysqlHandle) {
        let id = handle.conn.id();
        match self.block_on(handle.conn.disconnect()) {
            Ok(Ok(())) => debug!(connection_id = id, "MySQL connection closed"),
            Ok(Err(e)) => warn!(connection_id = id, error = %e, "MySQL disconnect failed"),
            Err(e) => warn!(connection_id = id, error = %e, "MySQL disconnect skipped"),
        }
    }

    fn name(&self) -> &'static str {
        "mysql"
    }
}

impl Drop for MysqlDriver {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for MysqlDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlDriver")
            .field("running", &self.runtime.is_some())
            .finish()
    }
}
