//! Secure keystore capability and the key manager built on it.
//!
//! The platform keystore is modelled as a synchronous `seal`/`unseal`
//! capability. Whatever the native mechanism looks like (OS keychain,
//! passphrase prompt, hardware enclave), the core only ever sees opaque
//! sealed tokens and treats every call as blocking with a timeout.
//!
//! ## Backends
//!
//! - [`KeyringKeystore`]: wrapping key held in the OS credential store
//! - [`PassphraseKeystore`]: wrapping key derived from a passphrase (Argon2id)
//! - [`MemoryKeystore`]: process-local wrapping key, for tests and scratch vaults

mod keychain;
mod manager;
mod memory;
mod passphrase;

use std::path::Path;
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::config::{KeystoreBackend, KeystoreSection};
use crate::error::{Result, VaultError};

pub use keychain::KeyringKeystore;
pub use manager::{KeyManager, KEY_SLOT_EXTENSION};
pub use memory::MemoryKeystore;
pub use passphrase::PassphraseKeystore;

/// Platform secure storage able to protect a secret.
///
/// Both operations fail with `VaultError::KeyUnavailable` when the keystore
/// is inaccessible (device locked, entry missing, token damaged). They must
/// never include secret bytes in errors or logs.
pub trait SecureKeystore: Send + Sync {
    /// Short stable name recorded in key slots (e.g. `"keyring"`).
    fn backend(&self) -> &'static str;

    /// Protect `secret`, returning an opaque token safe to store on disk.
    fn seal(&self, secret: &[u8]) -> Result<SealedToken>;

    /// Recover the secret protected by `token`.
    fn unseal(&self, token: &SealedToken) -> Result<Zeroizing<Vec<u8>>>;
}

/// Opaque output of [`SecureKeystore::seal`].
#[derive(Clone, PartialEq, Eq)]
pub struct SealedToken {
    bytes: Vec<u8>,
}

impl SealedToken {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for SealedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedToken")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Build the keystore selected in the `[keystore]` config section.
///
/// The keyring entry is keyed by the vault path so several vaults can share
/// one service name. The passphrase backend requires `passphrase`.
pub fn keystore_from_config(
    section: &KeystoreSection,
    vault_path: &Path,
    passphrase: Option<&str>,
) -> Result<Arc<dyn SecureKeystore>> {
    match section.backend {
        KeystoreBackend::Keyring => Ok(Arc::new(KeyringKeystore::new(
            section.service.clone(),
            &vault_path.display().to_string(),
        )?)),
        KeystoreBackend::Passphrase => {
            let passphrase = passphrase.ok_or_else(|| {
                VaultError::KeyUnavailable("Passphrase keystore needs a passphrase".to_string())
            })?;
            Ok(Arc::new(PassphraseKeystore::new(passphrase)?))
        }
        KeystoreBackend::Memory => Ok(Arc::new(MemoryKeystore::new()?)),
    }
}
