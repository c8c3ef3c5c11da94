//! Passphrase-encrypted recovery exports of the database key.
//!
//! A database file restored onto a new install is useless without its key.
//! The key can be exported as an Age passphrase-encrypted blob and imported
//! again later, which re-seals it into the new install's keystore.
//!
//! Age uses scrypt internally for passphrase-based encryption.

use std::io::{Read, Write};
use std::iter;

use age::secrecy::SecretString;
use zeroize::Zeroizing;

use crate::crypto::key::EncryptionKey;
use crate::crypto::passphrase::validate_passphrase;
use crate::error::{Result, VaultError};

/// Encrypt the database key under a recovery passphrase.
pub fn export_key(key: &EncryptionKey, passphrase: &str) -> Result<Vec<u8>> {
    validate_passphrase(passphrase)?;

    let encryptor =
        age::Encryptor::with_user_passphrase(SecretString::from(passphrase.to_string()));

    let mut encrypted = Vec::new();
    let mut writer = encryptor
        .wrap_output(&mut encrypted)
        .map_err(|e| VaultError::Storage(format!("Failed to create encryptor: {}", e)))?;

    writer
        .write_all(key.as_bytes())
        .map_err(|e| VaultError::Storage(format!("Recovery export write failed: {}", e)))?;

    writer
        .finish()
        .map_err(|e| VaultError::Storage(format!("Recovery export finish failed: {}", e)))?;

    Ok(encrypted)
}

/// Decrypt a recovery export back into the database key.
///
/// A wrong passphrase or a damaged export is a `DecryptionFailure`.
pub fn import_key(exported: &[u8], passphrase: &str) -> Result<EncryptionKey> {
    let decryptor = age::Decryptor::new(exported).map_err(|_| VaultError::DecryptionFailure)?;

    let identity = age::scrypt::Identity::new(SecretString::from(passphrase.to_string()));
    let mut reader = decryptor
        .decrypt(iter::once(&identity as &dyn age::Identity))
        .map_err(|_| VaultError::DecryptionFailure)?;

    let mut decrypted = Zeroizing::new(Vec::new());
    reader
        .read_to_end(&mut decrypted)
        .map_err(|_| VaultError::DecryptionFailure)?;

    EncryptionKey::from_slice(&decrypted).map_err(|_| VaultError::DecryptionFailure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_import_round_trip() {
        let key = EncryptionKey::generate().unwrap();
        let exported = export_key(&key, "recovery-passphrase-123").unwrap();

        assert!(!exported
            .windows(key.as_bytes().len())
            .any(|w| w == key.as_bytes()));

        let imported = import_key(&exported, "recovery-passphrase-123").unwrap();
        assert_eq!(imported.as_bytes(), key.as_bytes());
    }

    #[test]
    fn test_wrong_passphrase_is_decryption_failure() {
        let key = EncryptionKey::generate().unwrap();
        let exported = export_key(&key, "recovery-passphrase-123").unwrap();

        let result = import_key(&exported, "another-passphrase-456");
        assert!(matches!(result, Err(VaultError::DecryptionFailure)));
    }

    #[test]
    fn test_weak_passphrase_rejected() {
        let key = EncryptionKey::generate().unwrap();
        assert!(matches!(
            export_key(&key, "short"),
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_garbage_is_decryption_failure() {
        let result = import_key(b"not an age file", "recovery-passphrase-123");
        assert!(matches!(result, Err(VaultError::DecryptionFailure)));
    }
}
