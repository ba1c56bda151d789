/// Logging setup
///
/// Installs a `tracing_subscriber` formatter for hosts that do not bring
/// their own subscriber.
use crate::config::LoggingConfig;
use crate::core::{DsError, Result};
use tracing::Level;

/// Installs the global subscriber described by `config`.
///
/// Returns `Ok(false)` when a global subscriber was already installed, so
/// calling this more than once is harmless.
pub fn init(config: &LoggingConfig) -> Result<bool> {
    let level: Level = config
        .level
        .parse()
        .map_err(|_| DsError::Config(format!("unknown log level '{}'", config.level)))?;

    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(config.ansi)
        .with_target(true)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(level = %level, "logging initialized");
    }
    Ok(installed)
}
