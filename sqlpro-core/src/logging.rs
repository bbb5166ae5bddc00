//! Logging setup.
//!
//! The pool logs through `tracing`. Nothing is printed unless the
//! application installs a subscriber, either its own or the one set up by
//! [`init`] (requires the `tracing-subscriber` feature).
//!
//! # Environment Variables
//!
//! - `SQLPRO_DEBUG=true|1|yes` - Enable debug logging
//! - `SQLPRO_LOG_LEVEL=trace|debug|info|warn|error` - Set the log level
//! - `SQLPRO_LOG_FORMAT=json|pretty|compact` - Set the output format (default: json)
//!
//! ```rust,no_run
//! use sqlpro_core::logging;
//!
//! logging::init();
//! ```
//!
//! Events carry structured fields: `connection` and `worker` indices, the
//! backend `code` of a failed statement, `elapsed_ms` of a slow one.

use std::env;
use std::sync::Once;

/// Enables debug logging.
pub const DEBUG_VAR: &str = "SQLPRO_DEBUG";
/// Overrides the log level.
pub const LEVEL_VAR: &str = "SQLPRO_LOG_LEVEL";
/// Selects the output format.
pub const FORMAT_VAR: &str = "SQLPRO_LOG_FORMAT";

static INIT: Once = Once::new();

/// Check if `SQLPRO_DEBUG` asks for debug logging.
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var(DEBUG_VAR).is_ok_and(|v| is_truthy(&v))
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

/// The log level from `SQLPRO_LOG_LEVEL`.
///
/// Falls back to `debug` when `SQLPRO_DEBUG` is set, `warn` otherwise.
pub fn log_level() -> &'static str {
    resolve_level(env::var(LEVEL_VAR).ok().as_deref(), is_debug_enabled())
}

fn resolve_level(requested: Option<&str>, debug: bool) -> &'static str {
    let fallback = if debug { "debug" } else { "warn" };
    match requested.map(str::to_lowercase).as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("info") => "info",
        Some("warn") => "warn",
        Some("error") => "error",
        _ => fallback,
    }
}

/// The output format from `SQLPRO_LOG_FORMAT`.
pub fn log_format() -> &'static str {
    resolve_format(env::var(FORMAT_VAR).ok().as_deref())
}

fn resolve_format(requested: Option<&str>) -> &'static str {
    match requested.map(str::to_lowercase).as_deref() {
        Some("pretty") => "pretty",
        Some("compact") => "compact",
        _ => "json",
    }
}

/// Install the global subscriber.
///
/// Does nothing unless `SQLPRO_DEBUG` or `SQLPRO_LOG_LEVEL` is set. Only the
/// first call has any effect.
pub fn init() {
    INIT.call_once(|| {
        if !is_debug_enabled() && env::var(LEVEL_VAR).is_err() {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = log_level();
            let filter = EnvFilter::try_new(format!(
                "sqlpro={level},sqlpro_core={level},sqlpro_mysql={level}"
            ))
            .unwrap_or_else(|_| EnvFilter::new("warn"));

            let registry = tracing_subscriber::registry().with(filter);
            let installed = match log_format() {
                "pretty" => registry.with(fmt::layer().pretty()).try_init(),
                "compact" => registry.with(fmt::layer().compact()).try_init(),
                _ => registry.with(fmt::layer().json()).try_init(),
            };

            if installed.is_ok() {
                tracing::info!(level, format = log_format(), "sqlpro logging initialized");
            }
        }
    });
}

/// Set `SQLPRO_LOG_LEVEL` and [`init`].
///
/// # Safety
///
/// Modifies the process environment. Call before any other thread starts.
pub fn init_with_level(level: &str) {
    // SAFETY: documented as a startup-only call.
    unsafe {
        env::set_var(LEVEL_VAR, level);
    }
    init();
}

/// Set `SQLPRO_DEBUG` and [`init`].
///
/// # Safety
///
/// Modifies the process environment. Call before any other thread starts.
pub fn init_debug() {
    // SAFETY: documented as a startup-only call.
    unsafe {
        env::set_var(DEBUG_VAR, "true");
    }
    init();
}
