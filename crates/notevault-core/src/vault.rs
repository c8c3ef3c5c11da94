//! The opened vault: key, engine, schema and repository wired together.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::config::VaultConfig;
use crate::crypto::EncryptionKey;
use crate::error::{Result, VaultError};
use crate::keystore::{KeyManager, SecureKeystore};
use crate::legacy::{import_legacy_sqlite, LegacyImport};
use crate::notes::{ExportFormat, NoteFilter, NoteRepository, VaultMetadata, VaultStats};
use crate::schema::{MigrationReport, Migrator};
use crate::storage::{
    EngineOptions, RetryPolicy, StorageEngine, TransactionCoordinator, DEFAULT_LOCK_TIMEOUT,
};

/// Tunables for [`Vault::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultOptions {
    pub engine: EngineOptions,
    pub lock_timeout: Duration,
    pub retry: RetryPolicy,
    pub keystore_timeout: Duration,
}

impl Default for VaultOptions {
    fn default() -> Self {
        Self {
            engine: EngineOptions::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            retry: RetryPolicy::default(),
            keystore_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&VaultConfig> for VaultOptions {
    fn from(config: &VaultConfig) -> Self {
        Self {
            engine: config.engine_options(),
            lock_timeout: config.lock_timeout(),
            retry: config.retry_policy(),
            keystore_timeout: config.keystore_timeout(),
        }
    }
}

/// An open, migrated, encrypted notes vault.
pub struct Vault {
    keys: KeyManager,
    coordinator: TransactionCoordinator,
    notes: NoteRepository,
    migration: MigrationReport,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("path", &self.path())
            .field("migration", &self.migration)
            .finish_non_exhaustive()
    }
}

impl Vault {
    /// Open the vault at `path`, creating it (and its key) when absent.
    ///
    /// The key comes from `keystore` via the key slot next to the file. An
    /// existing file without a key slot fails closed with `KeyUnavailable`.
    /// Pending schema migrations run before this returns.
    pub fn open(
        path: &Path,
        keystore: Arc<dyn SecureKeystore>,
        options: VaultOptions,
    ) -> Result<Self> {
        let keys = KeyManager::for_database(keystore, path).with_timeout(options.keystore_timeout);
        let key = if path.exists() {
            keys.get_key()?
        } else {
            keys.get_or_create_key()?
        };

        let engine = open_engine(path, key, &keys, options.engine)?;
        let coordinator = TransactionCoordinator::new(engine)
            .with_lock_timeout(options.lock_timeout)
            .with_retry(options.retry);

        let migration = Migrator::builtin()?.migrate(&coordinator)?;
        let notes = NoteRepository::new(coordinator.clone())?;

        Ok(Self {
            keys,
            coordinator,
            notes,
            migration,
        })
    }

    /// Open the vault described by `config`.
    pub fn open_with_config(config: &VaultConfig, keystore: Arc<dyn SecureKeystore>) -> Result<Self> {
        config.validate()?;
        let path = config.vault_path()?;
        Self::open(&path, keystore, VaultOptions::from(config))
    }

    /// Install a key from a recovery export so the file at `path` can be
    /// opened with `keystore`.
    pub fn restore_key(
        path: &Path,
        keystore: Arc<dyn SecureKeystore>,
        exported: &[u8],
        passphrase: &str,
    ) -> Result<()> {
        KeyManager::for_database(keystore, path).import_recovery(exported, passphrase)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        self.coordinator.engine().path()
    }

    pub fn notes(&self) -> &NoteRepository {
        &self.notes
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    /// Migrations applied while opening.
    pub fn migration_report(&self) -> &MigrationReport {
        &self.migration
    }

    pub fn metadata(&self) -> Result<VaultMetadata> {
        self.notes.metadata()
    }

    pub fn stats(&self) -> Result<VaultStats> {
        self.notes.stats()
    }

    /// Re-encrypt the vault under a freshly generated key.
    ///
    /// The new key is staged in the pending slot first, so a crash after
    /// re-encryption still leaves a usable key for the next open.
    pub fn rotate_key(&self) -> Result<()> {
        let new_key = EncryptionKey::generate()?;
        self.keys.stage_rotation(&new_key)?;

        let engine = self.coordinator.engine();
        if let Err(err) = engine.rekey(new_key, self.coordinator.lock_timeout()) {
            if let Err(cleanup) = self.keys.discard_pending() {
                tracing::warn!(error = %cleanup, "Failed to discard staged key after rotation error");
            }
            return Err(err);
        }

        self.keys.promote_pending()
    }

    /// Export the current key under a recovery passphrase (age).
    pub fn export_recovery(&self, passphrase: &str) -> Result<Vec<u8>> {
        self.keys.export_recovery(passphrase)
    }

    /// Write every note, deleted ones included, to a plaintext file at
    /// `destination`. The file is replaced atomically with owner-only
    /// permissions.
    pub fn export_notes(&self, destination: &Path, format: ExportFormat) -> Result<usize> {
        let mut buffer = Zeroizing::new(Vec::new());
        let count = self.notes.export(NoteFilter::new(), format, &mut *buffer)?;
        crate::fs::ensure_parent_dir(destination)?;
        crate::fs::write_atomic(destination, &buffer)?;
        Ok(count)
    }

    /// One-time import of a plaintext SQLite notes database.
    pub fn import_legacy(&self, legacy_path: &Path) -> Result<LegacyImport> {
        import_legacy_sqlite(&self.notes, legacy_path)
    }

    /// Close the vault. Every commit is already on disk; this refuses new
    /// writers through any remaining handle.
    pub fn close(self) -> Result<()> {
        let engine = self.coordinator.engine();
        if engine.is_write_active()? {
            return Err(VaultError::InvalidInput(
                "Cannot close the vault while a write transaction is open".to_string(),
            ));
        }
        engine.mark_closed();
        tracing::info!(vault_id = %engine.vault_id(), "Closed vault");
        Ok(())
    }

    /// Path of the key slot file for the vault at `path`.
    pub fn key_slot_path(path: &Path) -> PathBuf {
        KeyManager::slot_path_for(path)
    }
}

/// Open the engine with the current key, falling back to a rotation key
/// that was staged but never promoted.
fn open_engine(
    path: &Path,
    key: EncryptionKey,
    keys: &KeyManager,
    options: EngineOptions,
) -> Result<Arc<StorageEngine>> {
    match StorageEngine::open(path, key, options) {
        Ok(engine) => {
            if keys.has_pending() {
                tracing::warn!("Discarding key from an unfinished rotation");
                keys.discard_pending()?;
            }
            Ok(engine)
        }
        Err(VaultError::DecryptionFailure) => {
            let Some(pending) = keys.pending_key()? else {
                return Err(VaultError::DecryptionFailure);
            };
            let engine = StorageEngine::open(path, pending, options)?;
            tracing::warn!("Recovered vault with the key from an interrupted rotation");
            keys.promote_pending()?;
            Ok(engine)
        }
        Err(err) => Err(err),
    }
}
