//! Key manager: obtains the database key through a secure keystore.
//!
//! The sealed key token lives in a *key slot* file next to the database:
//!
//! ```json
//! { "version": 1, "backend": "keyring", "token": "<base64>" }
//! ```
//!
//! A second, *pending* slot is used while a key rotation is in flight.

use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{SealedToken, SecureKeystore};
use crate::crypto::{recovery, EncryptionKey};
use crate::error::{Result, VaultError};

/// Extension appended to the database path for the key slot.
pub const KEY_SLOT_EXTENSION: &str = "keyslot";

const PENDING_EXTENSION: &str = "pending";
const SLOT_VERSION: u32 = 1;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
struct KeySlot {
    version: u32,
    backend: String,
    token: String,
}

/// Derives/retrieves the database key from secure storage.
///
/// Never persists the raw key; only sealed tokens reach disk.
pub struct KeyManager {
    keystore: Arc<dyn SecureKeystore>,
    slot_path: PathBuf,
    timeout: Duration,
}

impl KeyManager {
    pub fn new(keystore: Arc<dyn SecureKeystore>, slot_path: impl Into<PathBuf>) -> Self {
        Self {
            keystore,
            slot_path: slot_path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Key manager whose slot sits next to `db_path`.
    pub fn for_database(keystore: Arc<dyn SecureKeystore>, db_path: &Path) -> Self {
        Self::new(keystore, Self::slot_path_for(db_path))
    }

    /// Bound every keystore call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn slot_path_for(db_path: &Path) -> PathBuf {
        let mut name = db_path.as_os_str().to_os_string();
        name.push(".");
        name.push(KEY_SLOT_EXTENSION);
        PathBuf::from(name)
    }

    pub fn slot_path(&self) -> &Path {
        &self.slot_path
    }

    fn pending_path(&self) -> PathBuf {
        let mut name = self.slot_path.as_os_str().to_os_string();
        name.push(".");
        name.push(PENDING_EXTENSION);
        PathBuf::from(name)
    }

    /// Whether a key has been created for this slot.
    pub fn has_key(&self) -> bool {
        self.slot_path.exists()
    }

    /// Return the database key, generating and sealing one on first use.
    ///
    /// Idempotent. Once a slot exists, any failure to read or unseal it is
    /// `KeyUnavailable`; a replacement key is never generated.
    pub fn get_or_create_key(&self) -> Result<EncryptionKey> {
        self.finish_interrupted_promotion()?;
        if self.slot_path.exists() {
            return self.unseal_slot(&self.slot_path);
        }

        let key = EncryptionKey::generate()?;
        self.seal_into(&self.slot_path, &key)?;
        tracing::info!(slot = %self.slot_path.display(), "Generated new database key");
        Ok(key)
    }

    /// Return the existing database key without creating one.
    pub fn get_key(&self) -> Result<EncryptionKey> {
        self.finish_interrupted_promotion()?;
        if !self.slot_path.exists() {
            return Err(VaultError::KeyUnavailable(
                "No key has been created for this vault".to_string(),
            ));
        }
        self.unseal_slot(&self.slot_path)
    }

    /// Seal `new_key` into the pending slot ahead of a rotation.
    pub fn stage_rotation(&self, new_key: &EncryptionKey) -> Result<()> {
        self.seal_into(&self.pending_path(), new_key)
    }

    /// Whether a rotation left a pending slot behind.
    pub fn has_pending(&self) -> bool {
        self.pending_path().exists()
    }

    /// The key staged by an unfinished rotation, if any.
    pub fn pending_key(&self) -> Result<Option<EncryptionKey>> {
        let pending = self.pending_path();
        if !pending.exists() {
            return Ok(None);
        }
        self.unseal_slot(&pending).map(Some)
    }

    /// Make the pending key the current one.
    pub fn promote_pending(&self) -> Result<()> {
        crate::fs::rename_with_fallback(&self.pending_path(), &self.slot_path)
            .map_err(|e| VaultError::Storage(format!("Key slot promotion failed: {}", e)))?;
        tracing::info!(slot = %self.slot_path.display(), "Promoted rotated database key");
        Ok(())
    }

    // A pending slot without a current one means promotion removed the old
    // slot and stopped before the rename landed.
    fn finish_interrupted_promotion(&self) -> Result<()> {
        if !self.slot_path.exists() && self.has_pending() {
            tracing::warn!(slot = %self.slot_path.display(), "Completing interrupted key promotion");
            self.promote_pending()?;
        }
        Ok(())
    }

    /// Drop a staged rotation.
    pub fn discard_pending(&self) -> Result<()> {
        match std::fs::remove_file(self.pending_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Export the current key under a recovery passphrase.
    pub fn export_recovery(&self, passphrase: &str) -> Result<Vec<u8>> {
        let key = self.get_key()?;
        recovery::export_key(&key, passphrase)
    }

    /// Install a key from a recovery export into this manager's keystore.
    ///
    /// Refuses to overwrite an existing slot.
    pub fn import_recovery(&self, exported: &[u8], passphrase: &str) -> Result<EncryptionKey> {
        if self.slot_path.exists() {
            return Err(VaultError::InvalidInput(format!(
                "Key slot already exists: {}",
                self.slot_path.display()
            )));
        }
        let key = recovery::import_key(exported, passphrase)?;
        self.seal_into(&self.slot_path, &key)?;
        tracing::info!(slot = %self.slot_path.display(), "Imported database key from recovery export");
        Ok(key)
    }

    fn seal_into(&self, path: &Path, key: &EncryptionKey) -> Result<()> {
        let secret = Zeroizing::new(key.as_bytes().to_vec());
        let token = self.call_keystore("seal", move |keystore| keystore.seal(&secret))?;

        let slot = KeySlot {
            version: SLOT_VERSION,
            backend: self.keystore.backend().to_string(),
            token: STANDARD.encode(token.as_bytes()),
        };
        let contents = serde_json::to_vec_pretty(&slot)?;
        crate::fs::ensure_parent_dir(path)?;
        crate::fs::write_atomic(path, &contents)
    }

    fn unseal_slot(&self, path: &Path) -> Result<EncryptionKey> {
        let contents = std::fs::read(path).map_err(|e| {
            VaultError::KeyUnavailable(format!("Key slot {} unreadable: {}", path.display(), e))
        })?;
        let slot: KeySlot = serde_json::from_slice(&contents).map_err(|_| {
            VaultError::KeyUnavailable(format!("Key slot {} is corrupted", path.display()))
        })?;
        if slot.version != SLOT_VERSION {
            return Err(VaultError::KeyUnavailable(format!(
                "Unsupported key slot version {}",
                slot.version
            )));
        }
        if slot.backend != self.keystore.backend() {
            return Err(VaultError::KeyUnavailable(format!(
                "Key slot was sealed by the '{}' keystore, not '{}'",
                slot.backend,
                self.keystore.backend()
            )));
        }
        let token = STANDARD.decode(slot.token.as_bytes()).map_err(|_| {
            VaultError::KeyUnavailable(format!("Key slot {} is corrupted", path.display()))
        })?;
        let token = SealedToken::from_bytes(token);

        let secret = self.call_keystore("unseal", move |keystore| keystore.unseal(&token))?;
        EncryptionKey::from_slice(&secret)
    }

    /// Run a keystore call on a helper thread, bounded by the timeout.
    ///
    /// A call that outlives the timeout keeps running detached; its result
    /// is dropped.
    fn call_keystore<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SecureKeystore) -> Result<T> + Send + 'static,
    {
        let keystore = Arc::clone(&self.keystore);
        let (sender, receiver) = mpsc::channel();
        thread::Builder::new()
            .name(format!("notevault-keystore-{}", operation))
            .spawn(move || {
                let _ = sender.send(call(keystore.as_ref()));
            })
            .map_err(|e| {
                VaultError::KeyUnavailable(format!("Keystore worker failed to start: {}", e))
            })?;

        match receiver.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!(operation, timeout = ?self.timeout, "Keystore call timed out");
                Err(VaultError::KeyUnavailable(format!(
                    "Keystore {} timed out after {:?}",
                    operation, self.timeout
                )))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(VaultError::KeyUnavailable(
                format!("Keystore {} worker exited", operation),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryKeystore;
    use tempfile::tempdir;

    fn manager(dir: &Path) -> (Arc<MemoryKeystore>, KeyManager) {
        let keystore = Arc::new(MemoryKeystore::new().unwrap());
        let manager = KeyManager::for_database(keystore.clone(), &dir.join("notes.vault"));
        (keystore, manager)
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let dir = tempdir().unwrap();
        let (_keystore, manager) = manager(dir.path());

        let first = manager.get_or_create_key().unwrap();
        let second = manager.get_or_create_key().unwrap();

        assert_eq!(first.as_bytes(), second.as_bytes());
        assert!(manager.has_key());
    }

    #[test]
    fn test_slot_never_contains_raw_key() {
        let dir = tempdir().unwrap();
        let (_keystore, manager) = manager(dir.path());
        let key = manager.get_or_create_key().unwrap();

        let contents = std::fs::read(manager.slot_path()).unwrap();
        let raw_b64 = STANDARD.encode(key.as_bytes());
        let raw_hex = hex::encode(key.as_bytes());
        let text = String::from_utf8_lossy(&contents);
        assert!(!text.contains(&raw_b64));
        assert!(!text.contains(&raw_hex));
    }

    #[test]
    fn test_locked_keystore_never_regenerates() {
        let dir = tempdir().unwrap();
        let (keystore, manager) = manager(dir.path());
        manager.get_or_create_key().unwrap();
        let slot_before = std::fs::read(manager.slot_path()).unwrap();

        keystore.set_available(false);
        let result = manager.get_or_create_key();

        assert!(matches!(result, Err(VaultError::KeyUnavailable(_))));
        assert_eq!(std::fs::read(manager.slot_path()).unwrap(), slot_before);
    }

    #[test]
    fn test_corrupted_slot_is_unavailable() {
        let dir = tempdir().unwrap();
        let (_keystore, manager) = manager(dir.path());
        manager.get_or_create_key().unwrap();
        std::fs::write(manager.slot_path(), b"{ not json").unwrap();

        assert!(matches!(
            manager.get_or_create_key(),
            Err(VaultError::KeyUnavailable(_))
        ));
    }

    #[test]
    fn test_keystore_timeout_is_unavailable() {
        let dir = tempdir().unwrap();
        let keystore =
            Arc::new(MemoryKeystore::new().unwrap().with_latency(Duration::from_millis(300)));
        let manager = KeyManager::for_database(keystore, &dir.path().join("notes.vault"))
            .with_timeout(Duration::from_millis(20));

        let result = manager.get_or_create_key();
        assert!(matches!(result, Err(VaultError::KeyUnavailable(ref m)) if m.contains("timed out")));
        assert!(!manager.has_key());
    }

    #[test]
    fn test_get_key_without_slot_fails() {
        let dir = tempdir().unwrap();
        let (_keystore, manager) = manager(dir.path());
        assert!(matches!(
            manager.get_key(),
            Err(VaultError::KeyUnavailable(_))
        ));
    }

    #[test]
    fn test_pending_rotation_lifecycle() {
        let dir = tempdir().unwrap();
        let (_keystore, manager) = manager(dir.path());
        let old_key = manager.get_or_create_key().unwrap();
        assert!(manager.pending_key().unwrap().is_none());

        let new_key = EncryptionKey::generate().unwrap();
        manager.stage_rotation(&new_key).unwrap();
        assert_eq!(
            manager.pending_key().unwrap().unwrap().as_bytes(),
            new_key.as_bytes()
        );
        assert_eq!(manager.get_key().unwrap().as_bytes(), old_key.as_bytes());

        manager.promote_pending().unwrap();
        assert!(manager.pending_key().unwrap().is_none());
        assert_eq!(manager.get_key().unwrap().as_bytes(), new_key.as_bytes());
    }

    #[test]
    fn test_pending_slot_alone_becomes_current() {
        let dir = tempdir().unwrap();
        let (_keystore, manager) = manager(dir.path());
        manager.get_or_create_key().unwrap();
        let new_key = EncryptionKey::generate().unwrap();
        manager.stage_rotation(&new_key).unwrap();

        // Promotion removed the old slot and stopped before renaming.
        std::fs::remove_file(manager.slot_path()).unwrap();

        assert_eq!(manager.get_or_create_key().unwrap().as_bytes(), new_key.as_bytes());
        assert!(!manager.has_pending());
        assert_eq!(manager.get_key().unwrap().as_bytes(), new_key.as_bytes());
    }

    #[test]
    fn test_discard_pending_is_idempotent() {
        let dir = tempdir().unwrap();
        let (_keystore, manager) = manager(dir.path());
        manager.get_or_create_key().unwrap();
        manager
            .stage_rotation(&EncryptionKey::generate().unwrap())
            .unwrap();

        manager.discard_pending().unwrap();
        manager.discard_pending().unwrap();
        assert!(manager.pending_key().unwrap().is_none());
    }

    #[test]
    fn test_backend_mismatch_is_unavailable() {
        let dir = tempdir().unwrap();
        let (_keystore, manager) = manager(dir.path());
        manager.get_or_create_key().unwrap();

        let slot = std::fs::read_to_string(manager.slot_path()).unwrap();
        std::fs::write(
            manager.slot_path(),
            slot.replace("\"memory\"", "\"keyring\""),
        )
        .unwrap();

        let result = manager.get_key();
        assert!(matches!(result, Err(VaultError::KeyUnavailable(ref m)) if m.contains("keyring")));
    }
}
