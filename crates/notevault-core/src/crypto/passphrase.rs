//! Passphrase acceptance rule shared by the passphrase keystore and
//! recovery exports.

use crate::error::{Result, VaultError};

/// Shortest passphrase accepted, counted in characters.
pub const MIN_PASSPHRASE_CHARS: usize = 8;

/// Reject blank passphrases and ones shorter than [`MIN_PASSPHRASE_CHARS`].
pub fn validate_passphrase(passphrase: &str) -> Result<()> {
    let chars = passphrase.chars().count();
    let problem = if passphrase.trim().is_empty() {
        "is blank".to_string()
    } else if chars < MIN_PASSPHRASE_CHARS {
        format!("has {} characters, {} required", chars, MIN_PASSPHRASE_CHARS)
    } else {
        return Ok(());
    };
    Err(VaultError::InvalidInput(format!(
        "Vault passphrase rejected: {}",
        problem
    )))
}
