//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Fallback directives when `RUST_LOG` is unset: engine internals at
/// debug (drain passes, retry decisions), sqlx per-query noise muted.
const DEFAULT_DIRECTIVES: &str = "info,talon_engine=debug,sqlx=warn";

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with_default(DEFAULT_DIRECTIVES);
}

/// Initialize with the given fallback directives; `RUST_LOG` still wins
/// when set.
pub fn init_with_default(directives: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    // JSON logs + timestamps, configurable via RUST_LOG.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
