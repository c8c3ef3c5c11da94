//! Vault configuration file.
//!
//! ```toml
//! [vault]
//! path = "~/.local/share/notevault/notes.vault"
//! page_size = 4096
//!
//! [transactions]
//! lock_timeout_ms = 5000
//! retry_attempts = 3
//! retry_backoff_ms = 50
//!
//! [keystore]
//! backend = "keyring"
//! service = "notevault"
//! timeout_ms = 5000
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every section and field is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::fs::{ensure_parent_dir, write_atomic};
use crate::storage::{validate_page_size, EngineOptions, RetryPolicy, DEFAULT_PAGE_SIZE};

const APP_DIR: &str = "notevault";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub vault: VaultSection,
    pub transactions: TransactionsSection,
    pub keystore: KeystoreSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSection {
    /// Vault file; `~/` is expanded. Defaults to the XDG data dir.
    pub path: Option<String>,
    pub page_size: u32,
}

impl Default for VaultSection {
    fn default() -> Self {
        Self {
            path: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionsSection {
    pub lock_timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for TransactionsSection {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5000,
            retry_attempts: 3,
            retry_backoff_ms: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreSection {
    pub backend: KeystoreBackend,
    /// Service name used for OS credential store entries
    pub service: String,
    pub timeout_ms: u64,
}

impl Default for KeystoreSection {
    fn default() -> Self {
        Self {
            backend: KeystoreBackend::Keyring,
            service: APP_DIR.to_string(),
            timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeystoreBackend {
    #[default]
    Keyring,
    Passphrase,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// `tracing` filter directive, e.g. `info` or `notevault_core=debug`
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl VaultConfig {
    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        validate_page_size(self.vault.page_size)?;
        if self.transactions.lock_timeout_ms == 0 {
            return Err(VaultError::InvalidInput(
                "transactions.lock_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.transactions.retry_attempts == 0 {
            return Err(VaultError::InvalidInput(
                "transactions.retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.keystore.timeout_ms == 0 {
            return Err(VaultError::InvalidInput(
                "keystore.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.keystore.service.trim().is_empty() {
            return Err(VaultError::InvalidInput(
                "keystore.service cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolved vault file path.
    pub fn vault_path(&self) -> Result<PathBuf> {
        match &self.vault.path {
            Some(path) => expand_home(path, &home_dir()?),
            None => default_vault_path(),
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            page_size: self.vault.page_size,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.transactions.lock_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.transactions.retry_attempts,
            backoff: Duration::from_millis(self.transactions.retry_backoff_ms),
        }
    }

    pub fn keystore_timeout(&self) -> Duration {
        Duration::from_millis(self.keystore.timeout_ms)
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(xdg_config_dir()?.join("config.toml"))
}

pub fn default_vault_path() -> Result<PathBuf> {
    Ok(xdg_data_dir()?.join("notes.vault"))
}

/// Read and validate a config file.
pub fn read_config(path: &Path) -> Result<VaultConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        VaultError::InvalidInput(format!("Failed to read config {}: {}", path.display(), e))
    })?;
    parse_config(&contents)
        .map_err(|e| VaultError::InvalidInput(format!("Config {}: {}", path.display(), e)))
}

/// Read the config at `path`, falling back to defaults when it is absent.
pub fn read_config_or_default(path: &Path) -> Result<VaultConfig> {
    if path.exists() {
        read_config(path)
    } else {
        Ok(VaultConfig::default())
    }
}

pub fn parse_config(contents: &str) -> Result<VaultConfig> {
    let config: VaultConfig = toml::from_str(contents)
        .map_err(|e| VaultError::InvalidInput(format!("Failed to parse config: {}", e)))?;
    config.validate()?;
    Ok(config)
}

pub fn write_config(path: &Path, config: &VaultConfig) -> Result<()> {
    ensure_parent_dir(path)?;
    let contents = toml::to_string_pretty(config)
        .map_err(|e| VaultError::InvalidInput(format!("TOML error: {}", e)))?;
    write_atomic(path, contents.as_bytes())
}

pub fn xdg_config_dir() -> Result<PathBuf> {
    if let Ok(value) = std::env::var("XDG_CONFIG_HOME") {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value).join(APP_DIR));
        }
    }
    Ok(home_dir()?.join(".config").join(APP_DIR))
}

pub fn xdg_data_dir() -> Result<PathBuf> {
    if let Ok(value) = std::env::var("XDG_DATA_HOME") {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value).join(APP_DIR));
        }
    }
    Ok(home_dir()?.join(".local").join("share").join(APP_DIR))
}

fn home_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").map_err(|_| {
        VaultError::InvalidInput("HOME is not set; cannot resolve default paths".to_string())
    })?;
    Ok(PathBuf::from(home))
}

fn expand_home(path: &str, home: &Path) -> Result<PathBuf> {
    if path.trim().is_empty() {
        return Err(VaultError::InvalidInput(
            "vault.path cannot be empty".to_string(),
        ));
    }
    match path.strip_prefix("~/") {
        Some(rest) => Ok(home.join(rest)),
        None if path == "~" => Ok(home.to_path_buf()),
        None => Ok(PathBuf::from(path)),
    }
}
