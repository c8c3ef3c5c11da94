//! Authenticated Encryption with Associated Data.
//!
//! Uses XChaCha20-Poly1305. Key size: 32 bytes. Nonce: 24 bytes (random).
//! Tag: 16 bytes.
//!
//! Sealed wire format:
//!   [ nonce (24 bytes) | ciphertext + tag ]

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use zeroize::Zeroizing;

use crate::crypto::key::EncryptionKey;
use crate::error::{Result, VaultError};

/// Nonce length in bytes.
pub const NONCE_LEN: usize = 24;

/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Bytes added by [`seal`] on top of the plaintext length.
pub const SEAL_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// Encrypt `plaintext` under `key`, prepending a random nonce.
///
/// `aad` is authenticated but not encrypted.
pub fn seal(key: &EncryptionKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| VaultError::Storage("Invalid cipher key length".to_string()))?;

    let nonce_bytes: [u8; NONCE_LEN] = random_bytes()?;
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| VaultError::Storage("Encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt bytes produced by [`seal`].
///
/// Any authentication failure (wrong key, wrong `aad`, flipped bit,
/// truncation) is reported as `DecryptionFailure` with no plaintext.
pub fn open(key: &EncryptionKey, sealed: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(VaultError::DecryptionFailure);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let nonce = XNonce::from_slice(nonce_bytes);

    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| VaultError::DecryptionFailure)?;

    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| VaultError::DecryptionFailure)?;

    Ok(Zeroizing::new(plaintext))
}

/// Fill an array from the OS CSPRNG.
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| VaultError::Storage(format!("Random generation failed: {}", e)))?;
    Ok(bytes)
}
