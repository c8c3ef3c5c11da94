//! # Notevault Core
//!
//! Encrypted local persistence for a private notes app.
//!
//! Notes live in a single page-encrypted container file. The key never
//! touches disk in the clear: it is sealed by a platform keystore and
//! unsealed on open. Nothing is readable without the key, and a wrong key
//! or a tampered file fails closed instead of yielding garbage.
//!
//! ## Architecture
//!
//! - **keystore**: secure keystore capability and the key manager
//! - **crypto**: keys, page AEAD, passphrase derivation, recovery exports
//! - **storage**: encrypted ordered key-value engine and transactions
//! - **schema**: versioned migrations of the stored records
//! - **notes**: note records, filtering, ordering and the repository
//! - **legacy**: one-time import of the old plaintext SQLite database
//! - **vault**: the pieces above wired together behind [`Vault::open`]
//!
//! ```no_run
//! use std::sync::Arc;
//! use notevault_core::keystore::MemoryKeystore;
//! use notevault_core::notes::NewNote;
//! use notevault_core::{Vault, VaultOptions};
//!
//! # fn main() -> notevault_core::Result<()> {
//! let keystore = Arc::new(MemoryKeystore::new()?);
//! let vault = Vault::open("notes.vault".as_ref(), keystore, VaultOptions::default())?;
//! let id = vault.notes().create(NewNote::new("Groceries", "eggs, milk"))?;
//! assert!(vault.notes().get(id)?.is_some());
//! vault.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
mod fs;
pub mod keystore;
pub mod legacy;
pub mod logging;
pub mod notes;
pub mod schema;
pub mod storage;
pub mod vault;

pub use config::VaultConfig;
pub use error::{Result, VaultError};
pub use notes::{NoteId, NoteRepository};
pub use storage::{StorageEngine, TransactionCoordinator};
pub use vault::{Vault, VaultOptions};

/// Core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
