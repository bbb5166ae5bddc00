//! Core of the sqlpro connection pool.
//!
//! This crate provides the driver-agnostic pieces:
//!
//! - [`Connection`]: one exclusive-use driver handle with a busy flag
//! - [`TaskQueue`]: a blocking FIFO queue with shutdown
//! - [`ServicePool`]: fixed connections, worker threads and async dispatch
//! - [`SqlTransaction`]: statements run between `START TRANSACTION` and `COMMIT`
//! - [`Driver`], [`FromRow`]: the seams to the wire protocol and to record types
//!
//! # Example
//!
//! ```rust
//! use sqlpro_core::memory::MemoryDriver;
//! use sqlpro_core::{ConnectParams, ServicePool, Value};
//!
//! let driver = MemoryDriver::new().with_rows(
//!     "SELECT id, name FROM users",
//!     vec!["id", "name"],
//!     vec![
//!         vec![Value::Int(1), Value::Text("alice".into())],
//!         vec![Value::Int(2), Value::Text("bob".into())],
//!     ],
//! );
//! let pool = ServicePool::with_size(driver, ConnectParams::new("app"), 2).unwrap();
//!
//! let users: Vec<(i64, String)> = pool.submit_query("SELECT id, name FROM users").wait().unwrap();
//! assert_eq!(users[1], (2, "bob".to_string()));
//! ```

pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod logging;
pub mod memory;
pub mod pool;
pub mod queue;
pub mod row;
pub mod task;
pub mod transaction;

pub use config::{ConnectParams, DEFAULT_POOL_SIZE, PoolConfig, RollbackPolicy, SqlproConfig};
pub use connection::{Connection, PooledConnection};
pub use driver::Driver;
pub use error::{DriverError, SqlError, SqlResult};
pub use pool::{PoolStats, ServicePool, ServicePoolBuilder};
pub use queue::TaskQueue;
pub use row::{FromRow, FromRowError, FromValue, Row, Value};
pub use task::TaskHandle;
pub use transaction::SqlTransaction;
