//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events; applications embedding the vault
//! call [`init`] once at startup. `RUST_LOG` takes precedence over the
//! configured level.

use tracing_subscriber::EnvFilter;

use crate::error::{Result, VaultError};

/// Install a fmt subscriber filtered at `level` (e.g. `info` or
/// `notevault_core=debug`).
pub fn init(level: &str) -> Result<()> {
    let filter = build_filter(level)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|e| VaultError::InvalidInput(format!("Logging already initialized: {}", e)))?;

    tracing::debug!(level = %level, "Logging initialized");
    Ok(())
}

/// Initialize logging for tests. Safe to call more than once.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level)
        .map_err(|e| VaultError::InvalidInput(format!("Invalid log level '{}': {}", level, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_test_is_repeatable() {
        init_test();
        init_test();
        tracing::info!("still fine");
    }

    #[test]
    fn test_valid_directives_parse() {
        assert!(EnvFilter::try_new("info").is_ok());
        assert!(EnvFilter::try_new("notevault_core=debug,warn").is_ok());
    }
}
