//! OS credential store backend.
//!
//! A random 32-byte wrapping key is kept in the platform keychain
//! (macOS Keychain, Windows Credential Manager, Secret Service). Tokens are
//! the database key wrapped under it with XChaCha20-Poly1305, so the raw
//! database key never leaves process memory.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use zeroize::Zeroizing;

use super::{SealedToken, SecureKeystore};
use crate::crypto::aead;
use crate::crypto::EncryptionKey;
use crate::error::{Result, VaultError};

const WRAP_AAD: &[u8] = b"notevault-keyring-wrap-v1";

/// Keystore backed by the OS keychain via `keyring`.
///
/// Holds one credential entry for its lifetime, so every seal and unseal
/// talks to the same keychain item.
pub struct KeyringKeystore {
    service: String,
    entry: keyring::Entry,
}

impl KeyringKeystore {
    pub fn new(service: impl Into<String>, account: &str) -> Result<Self> {
        let service = service.into();
        let entry = keyring::Entry::new(&service, account)
            .map_err(|e| VaultError::KeyUnavailable(format!("Keychain entry failed: {}", e)))?;
        Ok(Self { service, entry })
    }

    fn read_wrapping_key(&self) -> Result<Option<EncryptionKey>> {
        match self.entry.get_password() {
            Ok(encoded) => {
                let encoded = Zeroizing::new(encoded);
                let decoded = Zeroizing::new(STANDARD.decode(encoded.as_bytes()).map_err(|_| {
                    VaultError::KeyUnavailable("Keychain wrapping key is malformed".to_string())
                })?);
                EncryptionKey::from_slice(&decoded).map(Some).map_err(|_| {
                    VaultError::KeyUnavailable("Keychain wrapping key is malformed".to_string())
                })
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(VaultError::KeyUnavailable(format!(
                "Keychain read failed: {}",
                err
            ))),
        }
    }

    fn write_wrapping_key(&self, key: &EncryptionKey) -> Result<()> {
        let encoded = Zeroizing::new(STANDARD.encode(key.as_bytes()));
        self.entry
            .set_password(&encoded)
            .map_err(|e| VaultError::KeyUnavailable(format!("Keychain write failed: {}", e)))
    }
}

impl SecureKeystore for KeyringKeystore {
    fn backend(&self) -> &'static str {
        "keyring"
    }

    fn seal(&self, secret: &[u8]) -> Result<SealedToken> {
        let wrapping_key = match self.read_wrapping_key()? {
            Some(key) => key,
            None => {
                let key = EncryptionKey::generate()?;
                self.write_wrapping_key(&key)?;
                tracing::info!(service = %self.service, "Created keychain wrapping key");
                key
            }
        };
        let wrapped = aead::seal(&wrapping_key, secret, WRAP_AAD)?;
        Ok(SealedToken::from_bytes(wrapped))
    }

    fn unseal(&self, token: &SealedToken) -> Result<Zeroizing<Vec<u8>>> {
        let wrapping_key = self.read_wrapping_key()?.ok_or_else(|| {
            VaultError::KeyUnavailable("Keychain wrapping key is missing".to_string())
        })?;
        aead::open(&wrapping_key, token.as_bytes(), WRAP_AAD).map_err(|_| {
            VaultError::KeyUnavailable("Sealed key rejected by keychain wrapping key".to_string())
        })
    }
}
