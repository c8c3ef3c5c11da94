//! Process-local keystore.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use zeroize::Zeroizing;

use super::{SealedToken, SecureKeystore};
use crate::crypto::aead;
use crate::crypto::EncryptionKey;
use crate::error::{Result, VaultError};

const WRAP_AAD: &[u8] = b"notevault-memory-wrap-v1";

/// Keystore whose wrapping key only lives as long as the value.
///
/// Tokens sealed by one instance cannot be unsealed by another. Availability
/// can be toggled and latency injected to exercise locked-device and
/// slow-keystore paths.
pub struct MemoryKeystore {
    wrapping_key: EncryptionKey,
    available: AtomicBool,
    latency: Option<Duration>,
}

impl MemoryKeystore {
    pub fn new() -> Result<Self> {
        Ok(Self {
            wrapping_key: EncryptionKey::generate()?,
            available: AtomicBool::new(true),
            latency: None,
        })
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Simulate the keystore becoming (in)accessible.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(VaultError::KeyUnavailable("Keystore is locked".to_string()))
        }
    }
}

impl SecureKeystore for MemoryKeystore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn seal(&self, secret: &[u8]) -> Result<SealedToken> {
        self.check()?;
        Ok(SealedToken::from_bytes(aead::seal(
            &self.wrapping_key,
            secret,
            WRAP_AAD,
        )?))
    }

    fn unseal(&self, token: &SealedToken) -> Result<Zeroizing<Vec<u8>>> {
        self.check()?;
        aead::open(&self.wrapping_key, token.as_bytes(), WRAP_AAD)
            .map_err(|_| VaultError::KeyUnavailable("Sealed token is damaged".to_string()))
    }
}
