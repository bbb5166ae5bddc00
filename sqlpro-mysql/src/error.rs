//! Mapping of `mysql_async` errors.

use mysql_async::Error;
use sqlpro_core::DriverError;

/// Convert a `mysql_async` error.
///
/// Server errors keep their code. I/O and protocol failures leave the
/// connection unusable and are flagged as disconnects.
pub fn to_driver_error(err: Error) -> DriverError {
    match err {
        Error::Server(e) => DriverError::new(e.message, u32::from(e.code)),
        Error::Io(e) => DriverError::disconnected(e.to_string()),
        Error::Driver(e) => DriverError::disconnected(e.to_string()),
        other => DriverError::new(other.to_string(), 0),
    }
}
