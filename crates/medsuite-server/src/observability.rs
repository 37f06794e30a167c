//! Tracing setup driven by the `[logging]` section.
//!
//! `RUST_LOG` takes precedence over `logging.level`. The filter sits behind a
//! reload layer, so [`apply_logging_level`] can change it while running.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::{LogFormat, LoggingConfig};

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Filter for `level`, unless `rust_log` carries usable directives.
pub fn build_filter(level: &str, rust_log: Option<&str>) -> Result<EnvFilter, String> {
    if let Some(directives) = rust_log.map(str::trim).filter(|d| !d.is_empty())
        && let Ok(filter) = EnvFilter::try_new(directives)
    {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|e| format!("invalid log level '{level}': {e}"))
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_tracing(cfg: &LoggingConfig) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter =
        build_filter(&cfg.level, rust_log.as_deref()).unwrap_or_else(|_| EnvFilter::new("info"));

    let (filter, handle) = reload::Layer::new(filter);
    let _ = FILTER_HANDLE.set(handle);

    let registry = tracing_subscriber::registry().with(filter);
    let _ = match cfg.format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true))
            .try_init(),
    };
}

/// Swaps the active filter. Ignored when `RUST_LOG` is set.
pub fn apply_logging_level(level: &str) -> Result<(), String> {
    let filter = build_filter(level, None)?;
    if std::env::var_os("RUST_LOG").is_some() {
        return Ok(());
    }
    let handle = FILTER_HANDLE
        .get()
        .ok_or_else(|| "tracing is not initialised".to_string())?;
    handle.reload(filter).map_err(|e| e.to_string())
}
