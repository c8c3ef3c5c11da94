//! Cryptographic operations for notevault.
//!
//! This module provides encryption and key handling using well-audited
//! libraries:
//! - **XChaCha20-Poly1305**: page and key-wrap AEAD
//! - **Argon2id**: memory-hard derivation of passphrase wrapping keys
//! - **Age**: passphrase-encrypted recovery exports of the database key
//!
//! ## Security Model
//!
//! - The database key is 32 random bytes, generated once per vault
//! - The raw key only lives in process memory and inside a sealed token
//! - Key material is zeroized from memory on drop and redacted in `Debug`
//!
//! ## Threat Model
//!
//! We defend against:
//! - Theft or backup leakage of the encrypted database file
//! - Tampering with, truncating or reordering file pages
//!
//! We do NOT defend against:
//! - Compromised OS / keylogger
//! - Access to an unlocked process's memory

pub mod aead;
pub mod key;
pub mod passphrase;
pub mod recovery;

pub use key::{derive_key, EncryptionKey, KdfParams, KEY_LENGTH};
pub use passphrase::validate_passphrase;
