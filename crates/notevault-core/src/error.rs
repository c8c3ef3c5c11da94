//! Error types for notevault core operations.
//!
//! This module defines the error hierarchy for all core operations.
//! Errors are descriptive at the core level; the application layer maps
//! these to user-facing states ("data unavailable", "busy", ...).
//!
//! Messages never carry key material, passphrases or note content.

use std::time::Duration;

use thiserror::Error;

use crate::notes::NoteId;

/// Result type alias for notevault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Core error type for notevault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The secure keystore could not seal or unseal the database key
    #[error("Encryption key unavailable: {0}")]
    KeyUnavailable(String),

    /// Wrong key or corrupted file; nothing was decoded
    #[error("Decryption failed: data unavailable")]
    DecryptionFailure,

    /// The database file could not be opened or created
    #[error("Open failed: {0}")]
    Open(String),

    /// A migration step failed; the database stays at `from_version`
    #[error("Migration from version {from_version} to {to_version} failed: {cause}")]
    Migration {
        from_version: u32,
        to_version: u32,
        #[source]
        cause: Box<VaultError>,
    },

    /// Schema version does not match what this build can serve
    #[error("Schema version {found} does not match expected version {expected}")]
    SchemaOutdated { found: u32, expected: u32 },

    /// Note not found by ID
    #[error("Note not found: {0}")]
    NotFound(NoteId),

    /// Write lock could not be acquired in time
    #[error("Timed out after {0:?} waiting for the write lock")]
    LockTimeout(Duration),

    /// Commit did not reach disk; pending writes were discarded
    #[error("Commit failed: {0}")]
    CommitFailure(String),

    /// Storage primitive used through a transaction that is no longer active
    #[error("No active transaction")]
    NoActiveTransaction,

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage backend error (generic)
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite error while reading a legacy plaintext database
    #[error("SQLite error: {source}")]
    Sqlite {
        #[from]
        source: rusqlite::Error,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl VaultError {
    /// Whether the caller may retry the failed operation as-is.
    ///
    /// Only lock contention qualifies.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::LockTimeout(_))
    }

    /// Whether the error means the store cannot be served in this session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VaultError::KeyUnavailable(_)
                | VaultError::DecryptionFailure
                | VaultError::Open(_)
                | VaultError::Migration { .. }
                | VaultError::SchemaOutdated { .. }
        )
    }
}
