//! Error types for pool, connection and dispatch operations.
//!
//! Every backend-facing failure is turned into a value at the connection
//! boundary. Nothing in this module is ever raised across a worker thread:
//! a submitted task hands its [`SqlError`] to the caller through the task's
//! [`TaskHandle`](crate::task::TaskHandle).
//!
//! ```rust
//! use sqlpro_core::{DriverError, SqlError};
//!
//! let err = SqlError::from(DriverError::new("Table 't' doesn't exist", 1146));
//! assert!(err.is_driver());
//! assert_eq!(err.driver_code(), Some(1146));
//!
//! let err = SqlError::saturated(4);
//! assert!(err.is_saturated());
//! ```

use thiserror::Error;

use crate::row::FromRowError;

/// Result type for pool and connection operations.
pub type SqlResult<T> = Result<T, SqlError>;

/// A failure reported by the database driver.
///
/// Carries the backend message and its numeric code. `code` is `0` when the
/// driver failed before the server produced a code (I/O, protocol).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct DriverError {
    /// Backend error message.
    pub message: String,
    /// Backend error code.
    pub code: u32,
    /// The link to the server is gone and the handle should be reopened.
    pub disconnected: bool,
}

impl DriverError {
    /// Create a driver error with a message and a backend code.
    pub fn new(message: impl Into<String>, code: u32) -> Self {
        Self {
            message: message.into(),
            code,
            disconnected: false,
        }
    }

    /// Create a driver error for a lost connection.
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: 0,
            disconnected: true,
        }
    }
}

/// Error type for pool, connection and dispatch operations.
#[derive(Debug, Error)]
pub enum SqlError {
    /// A connection could not be opened while building the pool.
    #[error("failed to open connection #{index}: {source}")]
    Setup {
        /// Position of the connection in the pool.
        index: usize,
        /// Driver failure.
        #[source]
        source: DriverError,
    },

    /// A statement or row fetch failed.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// No connection was free at submission time.
    #[error("all {size} connections are busy")]
    Saturated {
        /// Pool size.
        size: usize,
    },

    /// The pool has been shut down.
    #[error("pool is shut down")]
    PoolClosed,

    /// A statement inside a transaction failed and the transaction was rolled back.
    #[error("transaction rolled back at statement #{statement}: {source}")]
    TransactionFailed {
        /// Index of the failing statement.
        statement: usize,
        /// Driver failure of that statement.
        #[source]
        source: Box<SqlError>,
    },

    /// A transaction without statements was submitted.
    #[error("transaction has no statements")]
    EmptyTransaction,

    /// The connection's driver handle has been closed.
    #[error("connection #{0} is closed")]
    ConnectionClosed(usize),

    /// A result row could not be mapped onto the requested record type.
    #[error("row mapping failed: {0}")]
    Mapping(#[from] FromRowError),

    /// The task was discarded before it produced a result.
    #[error("task aborted before completion")]
    Aborted,

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl SqlError {
    /// Create a saturation rejection.
    pub fn saturated(size: usize) -> Self {
        Self::Saturated { size }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap the failure of the `statement`-th statement of a transaction.
    pub fn transaction_failed(statement: usize, source: SqlError) -> Self {
        Self::TransactionFailed {
            statement,
            source: Box::new(source),
        }
    }

    /// Check if this is a saturation rejection.
    pub fn is_saturated(&self) -> bool {
        matches!(self, Self::Saturated { .. })
    }

    /// Check if this is a driver failure.
    pub fn is_driver(&self) -> bool {
        matches!(self, Self::Driver(_))
    }

    /// Check if this is a rolled back transaction.
    pub fn is_transaction_failure(&self) -> bool {
        matches!(self, Self::TransactionFailed { .. })
    }

    /// Check if the task was aborted.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// The backend error code, if this error came from the driver.
    pub fn driver_code(&self) -> Option<u32> {
        match self {
            Self::Driver(e) => Some(e.code),
            Self::Setup { source, .. } => Some(source.code),
            Self::TransactionFailed { source, .. } => source.driver_code(),
            _ => None,
        }
    }
}
