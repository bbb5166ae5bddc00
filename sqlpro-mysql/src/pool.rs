//! MySQL pool constructors.

use sqlpro_core::{ConnectParams, PoolConfig, ServicePool, SqlResult, SqlproConfig};
use tracing::info;

use crate::driver::MysqlDriver;

/// A pool of MySQL connections.
pub type MysqlPool = ServicePool<MysqlDriver>;

/// Open a pool of `size` connections.
pub fn connect(size: usize, params: ConnectParams) -> SqlResult<MysqlPool> {
    connect_with(params, PoolConfig::new().size(size))
}

/// Open a pool of `size` connections from a `mysql://` URL.
pub fn connect_url(size: usize, url: &str) -> SqlResult<MysqlPool> {
    connect(size, ConnectParams::from_url(url)?)
}

/// Open a pool with explicit pool settings.
pub fn connect_with(params: ConnectParams, config: PoolConfig) -> SqlResult<MysqlPool> {
    info!(host = %params.host, database = %params.database, "Opening MySQL pool");
    ServicePool::new(MysqlDriver::new()?, params, config)
}

/// Open a pool described by a `sqlpro.toml` configuration.
pub fn connect_config(config: &SqlproConfig) -> SqlResult<MysqlPool> {
    connect_with(config.connect_params()?, config.pool.clone())
}
