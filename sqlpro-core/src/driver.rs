//! The database driver boundary.
//!
//! The pool never speaks a wire protocol itself. A [`Driver`] opens handles,
//! runs statement text on them, hands back the rows of the last statement
//! and closes them. Handles are only ever used by one thread at a time: the
//! connection that owns a handle is locked for the duration of every call.

use crate::config::ConnectParams;
use crate::error::DriverError;
use crate::row::Row;

/// A database driver.
pub trait Driver: Send + Sync + 'static {
    /// An open connection to the backend.
    type Handle: Send + 'static;

    /// Open a connection.
    fn connect(&self, params: &ConnectParams) -> Result<Self::Handle, DriverError>;

    /// Run one statement.
    fn execute(&self, handle: &mut Self::Handle, sql: &str) -> Result<(), DriverError>;

    /// Take the rows produced by the last executed statement.
    ///
    /// Statements without a result set yield no rows.
    fn fetch_rows(&self, handle: &mut Self::Handle) -> Result<Vec<Row>, DriverError>;

    /// Close a connection.
    fn close(&self, handle: Self::Handle);

    /// Short name used in log output.
    fn name(&self) -> &'static str {
        "driver"
    }
}
