//! Passphrase-protected keystore.
//!
//! The wrapping key is derived with Argon2id from a user passphrase and a
//! per-token random salt. Token layout:
//!
//! ```text
//! [ version (1) | memory_kb (4) | iterations (4) | parallelism (4) | salt (16) | sealed key ]
//! ```

use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use super::{SealedToken, SecureKeystore};
use crate::crypto::{aead, derive_key, validate_passphrase, KdfParams};
use crate::error::{Result, VaultError};

const TOKEN_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const HEADER_LEN: usize = 1 + 4 + 4 + 4 + SALT_LEN;
const WRAP_AAD: &[u8] = b"notevault-passphrase-wrap-v1";

/// Keystore that unlocks with a passphrase.
pub struct PassphraseKeystore {
    passphrase: SecretString,
    params: KdfParams,
}

impl PassphraseKeystore {
    /// Build a keystore with the default Argon2id cost.
    pub fn new(passphrase: &str) -> Result<Self> {
        Self::with_params(passphrase, KdfParams::default())
    }

    /// Build a keystore with an explicit Argon2id cost for newly sealed tokens.
    ///
    /// Existing tokens always unseal with the cost recorded inside them.
    pub fn with_params(passphrase: &str, params: KdfParams) -> Result<Self> {
        validate_passphrase(passphrase)?;
        Ok(Self {
            passphrase: SecretString::from(passphrase.to_string()),
            params,
        })
    }
}

impl SecureKeystore for PassphraseKeystore {
    fn backend(&self) -> &'static str {
        "passphrase"
    }

    fn seal(&self, secret: &[u8]) -> Result<SealedToken> {
        let salt: [u8; SALT_LEN] = aead::random_bytes()?;
        let wrapping_key = derive_key(self.passphrase.expose_secret(), &salt, self.params)?;
        let sealed = aead::seal(&wrapping_key, secret, WRAP_AAD)?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + sealed.len());
        bytes.push(TOKEN_VERSION);
        bytes.extend_from_slice(&self.params.memory_kb.to_le_bytes());
        bytes.extend_from_slice(&self.params.iterations.to_le_bytes());
        bytes.extend_from_slice(&self.params.parallelism.to_le_bytes());
        bytes.extend_from_slice(&salt);
        bytes.extend_from_slice(&sealed);
        Ok(SealedToken::from_bytes(bytes))
    }

    fn unseal(&self, token: &SealedToken) -> Result<Zeroizing<Vec<u8>>> {
        let bytes = token.as_bytes();
        if bytes.len() < HEADER_LEN || bytes[0] != TOKEN_VERSION {
            return Err(VaultError::KeyUnavailable(
                "Passphrase token is malformed".to_string(),
            ));
        }

        let params = KdfParams {
            memory_kb: read_u32(&bytes[1..5]),
            iterations: read_u32(&bytes[5..9]),
            parallelism: read_u32(&bytes[9..13]),
        };
        let salt = &bytes[13..HEADER_LEN];
        let wrapping_key = derive_key(self.passphrase.expose_secret(), salt, params)
            .map_err(|_| VaultError::KeyUnavailable("Passphrase token is malformed".to_string()))?;

        aead::open(&wrapping_key, &bytes[HEADER_LEN..], WRAP_AAD)
            .map_err(|_| VaultError::KeyUnavailable("Passphrase rejected".to_string()))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> KdfParams {
        KdfParams {
            memory_kb: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_seal_unseal_round_trip() {
        let keystore = PassphraseKeystore::with_params("correct horse battery", cheap()).unwrap();
        let token = keystore.seal(b"database-key-bytes").unwrap();
        assert_eq!(
            keystore.unseal(&token).unwrap().as_slice(),
            b"database-key-bytes"
        );
    }

    #[test]
    fn test_wrong_passphrase_is_unavailable() {
        let sealer = PassphraseKeystore::with_params("correct horse battery", cheap()).unwrap();
        let token = sealer.seal(b"database-key-bytes").unwrap();

        let other = PassphraseKeystore::with_params("incorrect horse battery", cheap()).unwrap();
        assert!(matches!(
            other.unseal(&token),
            Err(VaultError::KeyUnavailable(_))
        ));
    }

    #[test]
    fn test_token_records_its_own_cost() {
        let sealer = PassphraseKeystore::with_params("correct horse battery", cheap()).unwrap();
        let token = sealer.seal(b"database-key-bytes").unwrap();

        let stronger = KdfParams {
            memory_kb: 2048,
            iterations: 2,
            parallelism: 1,
        };
        let opener = PassphraseKeystore::with_params("correct horse battery", stronger).unwrap();
        assert!(opener.unseal(&token).is_ok());
    }

    #[test]
    fn test_truncated_token_is_unavailable() {
        let keystore = PassphraseKeystore::with_params("correct horse battery", cheap()).unwrap();
        let token = SealedToken::from_bytes(vec![TOKEN_VERSION, 0, 0]);
        assert!(matches!(
            keystore.unseal(&token),
            Err(VaultError::KeyUnavailable(_))
        ));
    }

    #[test]
    fn test_weak_passphrase_rejected() {
        assert!(PassphraseKeystore::new("short").is_err());
    }
}
