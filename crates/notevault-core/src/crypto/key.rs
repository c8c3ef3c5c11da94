//! Database key material and Argon2id key derivation.

use argon2::Argon2;
use serde::{Deserialize, Serialize};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::{Result, VaultError};

/// Argon2id defaults:
/// - Memory: 64 MB (64 * 1024 KB)
/// - Iterations: 3
/// - Parallelism: 1
const ARGON2_MEMORY_KB: u32 = 64 * 1024;
const ARGON2_ITERATIONS: u32 = 3;
const ARGON2_PARALLELISM: u32 = 1;

/// Length of a database key in bytes (256 bits).
pub const KEY_LENGTH: usize = 32;

/// Minimum salt length accepted by [`derive_key`].
pub const MIN_SALT_LENGTH: usize = 16;

/// The database encryption key.
///
/// Held only in process memory and inside sealed keystore tokens. The bytes
/// are zeroized when the value is dropped and never appear in `Debug`
/// output. Rotation builds a new key; an existing key is never mutated.
#[derive(Clone, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; KEY_LENGTH],
}

impl EncryptionKey {
    /// Generate a fresh random key from the OS CSPRNG.
    pub fn generate() -> Result<Self> {
        let mut bytes = Zeroizing::new([0u8; KEY_LENGTH]);
        getrandom::getrandom(&mut bytes[..])
            .map_err(|e| VaultError::KeyUnavailable(format!("Failed to generate key: {}", e)))?;
        Ok(Self::from_bytes(*bytes))
    }

    pub(crate) fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self { key: bytes }
    }

    /// Rebuild a key from unsealed bytes.
    ///
    /// Fails with `KeyUnavailable` when the length is wrong, which means the
    /// keystore returned something that is not one of our keys.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| {
            VaultError::KeyUnavailable("Unsealed key has unexpected length".to_string())
        })?;
        Ok(Self::from_bytes(key))
    }

    /// Get a reference to the raw key bytes.
    ///
    /// # Security
    ///
    /// Avoid storing or logging this value. Use only for immediate encryption operations.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id cost parameters.
///
/// Stored next to the salt in passphrase-sealed tokens so a token always
/// unseals with the parameters it was sealed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kb: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kb: ARGON2_MEMORY_KB,
            iterations: ARGON2_ITERATIONS,
            parallelism: ARGON2_PARALLELISM,
        }
    }
}

/// Derive a wrapping key from a passphrase using Argon2id.
///
/// Same passphrase, salt and parameters always produce the same key.
///
/// # Examples
///
/// ```
/// use notevault_core::crypto::{derive_key, KdfParams};
///
/// let params = KdfParams { memory_kb: 1024, iterations: 1, parallelism: 1 };
/// let salt = b"unique-salt-per-vault-16b";
/// let key = derive_key("my-passphrase", salt, params).unwrap();
/// assert_eq!(key.as_bytes().len(), 32);
/// ```
pub fn derive_key(passphrase: &str, salt: &[u8], params: KdfParams) -> Result<EncryptionKey> {
    if passphrase.is_empty() {
        return Err(VaultError::InvalidInput(
            "Passphrase cannot be empty".to_string(),
        ));
    }

    if salt.len() < MIN_SALT_LENGTH {
        return Err(VaultError::InvalidInput(format!(
            "Salt must be at least {} bytes",
            MIN_SALT_LENGTH
        )));
    }

    let argon_params = argon2::Params::new(
        params.memory_kb,
        params.iterations,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| VaultError::InvalidInput(format!("Invalid Argon2 parameters: {}", e)))?;

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon_params,
    );

    let mut key_bytes = Zeroizing::new([0u8; KEY_LENGTH]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key_bytes[..])
        .map_err(|e| VaultError::KeyUnavailable(format!("Key derivation failed: {}", e)))?;

    Ok(EncryptionKey::from_bytes(*key_bytes))
}
