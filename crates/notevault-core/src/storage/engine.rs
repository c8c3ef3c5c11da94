//! Storage engine: committed snapshot, writer gate, persistence.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::container::{self, DEFAULT_PAGE_SIZE, FORMAT_VERSION};
use super::snapshot::{self, Pending, Snapshot};
use crate::crypto::EncryptionKey;
use crate::error::{Result, VaultError};
use crate::fs::{ensure_parent_dir, remove_files, stale_temp_files, write_atomic};

/// Options used when creating a new vault file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub page_size: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// State of the single active write transaction.
#[derive(Debug)]
struct WriteState {
    generation: u64,
    owner: ThreadId,
    depth: u32,
    pending: Pending,
    rollback_only: bool,
}

/// Outcome of asking for the write lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WriteTicket {
    pub generation: u64,
    pub nested: bool,
}

/// Single-file encrypted key/value store.
///
/// Readers clone the committed `Arc<Snapshot>` and never block. Writers
/// serialize on `writer`; a commit builds the next snapshot, persists it,
/// then publishes it by swapping the `Arc`.
pub struct StorageEngine {
    path: PathBuf,
    vault_id: Uuid,
    page_size: u32,
    key: RwLock<Arc<EncryptionKey>>,
    committed: RwLock<Arc<Snapshot>>,
    writer: Mutex<Option<WriteState>>,
    writer_released: Condvar,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("path", &self.path)
            .field("vault_id", &self.vault_id)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl StorageEngine {
    /// Open the vault at `path`, creating it when absent.
    ///
    /// An existing file is fully authenticated before this returns; a wrong
    /// key or a damaged file is `DecryptionFailure`. When the file is missing
    /// but a complete image under `key` survives in a temp file, that image
    /// is moved into place instead of creating an empty vault.
    pub fn open(path: &Path, key: EncryptionKey, options: EngineOptions) -> Result<Arc<Self>> {
        container::validate_page_size(options.page_size)?;
        ensure_parent_dir(path).map_err(|e| VaultError::Open(e.to_string()))?;

        let stale = stale_temp_files(path).map_err(|e| VaultError::Open(e.to_string()))?;
        if !path.exists() {
            recover_interrupted_replace(path, &key, &stale)?;
        }
        if !stale.is_empty() {
            remove_files(&stale).map_err(|e| VaultError::Open(e.to_string()))?;
            tracing::warn!(count = stale.len(), "Removed leftover temp files from an interrupted write");
        }

        let (vault_id, page_size, snapshot, created) = if path.exists() {
            let image = fs::read(path).map_err(|e| {
                VaultError::Open(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let (header, payload) = container::open_image(&key, &image)?;
            let snapshot = snapshot::decode(&payload)?;
            (header.vault_id, header.page_size, snapshot, false)
        } else {
            (Uuid::new_v4(), options.page_size, Snapshot::new(), true)
        };

        let engine = Self {
            path: path.to_path_buf(),
            vault_id,
            page_size,
            key: RwLock::new(Arc::new(key)),
            committed: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(None),
            writer_released: Condvar::new(),
            next_generation: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        };

        if created {
            let key = engine.current_key()?;
            let empty = engine.snapshot()?;
            engine
                .persist(&empty, &key)
                .map_err(|e| VaultError::Open(e.to_string()))?;
            tracing::info!(vault_id = %vault_id, page_size, "Created vault file");
        } else {
            tracing::info!(vault_id = %vault_id, page_size, "Opened vault file");
        }

        Ok(Arc::new(engine))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn vault_id(&self) -> Uuid {
        self.vault_id
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn format_version(&self) -> u16 {
        FORMAT_VERSION
    }

    /// Size of the encrypted file on disk.
    pub fn file_size(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Current committed snapshot.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>> {
        let committed = self
            .committed
            .read()
            .map_err(|_| VaultError::Storage("Snapshot lock poisoned".to_string()))?;
        Ok(Arc::clone(&committed))
    }

    /// Whether a write transaction is currently open.
    pub fn is_write_active(&self) -> Result<bool> {
        Ok(self.lock_writer()?.is_some())
    }

    /// Stop handing out write transactions.
    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Acquire the write lock, waiting at most `timeout`.
    ///
    /// A request from the thread that already owns the lock joins the open
    /// transaction instead of waiting on itself.
    pub(crate) fn begin_write(&self, timeout: Duration) -> Result<WriteTicket> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VaultError::Storage("Vault is closed".to_string()));
        }

        let current = thread::current().id();
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock_writer()?;

        loop {
            match slot.as_mut() {
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
                    *slot = Some(WriteState {
                        generation,
                        owner: current,
                        depth: 1,
                        pending: BTreeMap::new(),
                        rollback_only: false,
                    });
                    return Ok(WriteTicket {
                        generation,
                        nested: false,
                    });
                }
                Some(state) if state.owner == current => {
                    state.depth += 1;
                    return Ok(WriteTicket {
                        generation: state.generation,
                        nested: true,
                    });
                }
                Some(_) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(VaultError::LockTimeout(timeout));
                    }
                    let (guard, _) = self
                        .writer_released
                        .wait_timeout(slot, deadline - now)
                        .map_err(|_| VaultError::Storage("Writer lock poisoned".to_string()))?;
                    slot = guard;
                }
            }
        }
    }

    /// Read `key` as seen by the transaction `generation`.
    pub(crate) fn read_in(&self, generation: u64, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let slot = self.lock_writer()?;
        let state = active(&slot, generation)?;
        if let Some(pending) = state.pending.get(key) {
            return Ok(pending.clone());
        }
        drop(slot);
        Ok(self.snapshot()?.get(key).cloned())
    }

    pub(crate) fn write_in(&self, generation: u64, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let mut slot = self.lock_writer()?;
        active_mut(&mut slot, generation)?
            .pending
            .insert(key, Some(value));
        Ok(())
    }

    /// Stage a delete. Returns whether the key was visible before.
    pub(crate) fn delete_in(&self, generation: u64, key: &[u8]) -> Result<bool> {
        let mut slot = self.lock_writer()?;
        let state = active_mut(&mut slot, generation)?;
        let existed = match state.pending.get(key) {
            Some(pending) => pending.is_some(),
            None => self.snapshot()?.contains_key(key),
        };
        state.pending.insert(key.to_vec(), None);
        Ok(existed)
    }

    /// Snapshot as seen by the transaction: committed state plus its own
    /// pending writes.
    pub(crate) fn view_in(&self, generation: u64) -> Result<Arc<Snapshot>> {
        let slot = self.lock_writer()?;
        let state = active(&slot, generation)?;
        let committed = self.snapshot()?;
        if state.pending.is_empty() {
            Ok(committed)
        } else {
            Ok(Arc::new(snapshot::merge(&committed, &state.pending)))
        }
    }

    /// Commit the transaction `ticket` refers to.
    ///
    /// Nested tickets only unwind one level. Any failure releases the lock
    /// with the committed state untouched.
    pub(crate) fn commit(&self, ticket: WriteTicket) -> Result<()> {
        let mut slot = self.lock_writer()?;

        if ticket.nested {
            let state = active_mut(&mut slot, ticket.generation)?;
            state.depth = state.depth.saturating_sub(1);
            return Ok(());
        }

        active(&slot, ticket.generation)?;
        let Some(state) = slot.take() else {
            return Err(VaultError::NoActiveTransaction);
        };
        let result = self.publish(state);
        drop(slot);
        self.writer_released.notify_one();
        result
    }

    fn publish(&self, state: WriteState) -> Result<()> {
        if state.rollback_only {
            tracing::debug!(
                generation = state.generation,
                "Discarded rollback-only transaction"
            );
            return Err(VaultError::CommitFailure(
                "A nested scope rolled back; all writes were discarded".to_string(),
            ));
        }
        if state.pending.is_empty() {
            return Ok(());
        }

        let committed = self.snapshot()?;
        let mut next = (*committed).clone();
        snapshot::apply(&mut next, &state.pending);

        let key = self.current_key()?;
        if let Err(err) = self.persist(&next, &key) {
            tracing::error!(error = %err, "Commit failed; pending writes discarded");
            return Err(VaultError::CommitFailure(err.to_string()));
        }

        *self
            .committed
            .write()
            .map_err(|_| VaultError::Storage("Snapshot lock poisoned".to_string()))? = Arc::new(next);
        tracing::debug!(
            generation = state.generation,
            writes = state.pending.len(),
            "Committed transaction"
        );
        Ok(())
    }

    /// Roll back the transaction `ticket` refers to.
    ///
    /// Rolling back a nested ticket marks the outer transaction
    /// rollback-only. A ticket that is no longer active is ignored.
    pub(crate) fn rollback(&self, ticket: WriteTicket) -> Result<()> {
        let mut slot = self.lock_writer()?;
        let Some(state) = slot.as_mut().filter(|s| s.generation == ticket.generation) else {
            return Ok(());
        };

        if ticket.nested {
            state.depth = state.depth.saturating_sub(1);
            state.rollback_only = true;
            tracing::debug!(generation = ticket.generation, "Nested scope rolled back");
            return Ok(());
        }

        let discarded = state.pending.len();
        *slot = None;
        drop(slot);
        self.writer_released.notify_one();
        tracing::debug!(
            generation = ticket.generation,
            discarded,
            "Rolled back transaction"
        );
        Ok(())
    }

    /// Re-encrypt the whole file under `new_key` and make it the active key.
    ///
    /// Holds the write lock for the duration, so no commit can interleave.
    pub(crate) fn rekey(&self, new_key: EncryptionKey, timeout: Duration) -> Result<()> {
        let current = thread::current().id();
        if self
            .lock_writer()?
            .as_ref()
            .is_some_and(|state| state.owner == current)
        {
            return Err(VaultError::InvalidInput(
                "Cannot rotate the key inside an open transaction".to_string(),
            ));
        }

        let ticket = self.begin_write(timeout)?;
        let result = (|| -> Result<()> {
            let new_key = Arc::new(new_key);
            let committed = self.snapshot()?;
            self.persist(&committed, &new_key)?;
            *self
                .key
                .write()
                .map_err(|_| VaultError::Storage("Key lock poisoned".to_string()))? = new_key;
            Ok(())
        })();

        self.rollback(ticket)?;
        if result.is_ok() {
            tracing::info!(vault_id = %self.vault_id, "Re-encrypted vault under a new key");
        }
        result
    }

    fn current_key(&self) -> Result<Arc<EncryptionKey>> {
        let key = self
            .key
            .read()
            .map_err(|_| VaultError::Storage("Key lock poisoned".to_string()))?;
        Ok(Arc::clone(&key))
    }

    fn persist(&self, snapshot: &Snapshot, key: &EncryptionKey) -> Result<()> {
        let payload = snapshot::encode(snapshot)?;
        let image = container::seal_image(key, self.vault_id, self.page_size, &payload)?;
        write_atomic(&self.path, &image)
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, Option<WriteState>>> {
        self.writer
            .lock()
            .map_err(|_| VaultError::Storage("Writer lock poisoned".to_string()))
    }
}

fn active(slot: &Option<WriteState>, generation: u64) -> Result<&WriteState> {
    slot.as_ref()
        .filter(|state| state.generation == generation)
        .ok_or(VaultError::NoActiveTransaction)
}

fn active_mut(slot: &mut Option<WriteState>, generation: u64) -> Result<&mut WriteState> {
    slot.as_mut()
        .filter(|state| state.generation == generation)
        .ok_or(VaultError::NoActiveTransaction)
}

// Put back the newest temp image that authenticates under `key`.
//
// The destination only goes missing while a replace is in flight, and a temp
// file is complete once its rename is attempted. Temps that fail to open are
// partial first writes and are left for removal.
fn recover_interrupted_replace(
    path: &Path,
    key: &EncryptionKey,
    temps: &[PathBuf],
) -> Result<()> {
    for temp in temps.iter().rev() {
        let Ok(image) = fs::read(temp) else {
            continue;
        };
        if container::open_image(key, &image).is_err() {
            continue;
        }
        fs::rename(temp, path).map_err(|e| {
            VaultError::Open(format!("Failed to restore {}: {}", temp.display(), e))
        })?;
        tracing::warn!(temp = %temp.display(), "Restored vault image from an interrupted write");
        return Ok(());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TIMEOUT: Duration = Duration::from_millis(200);

    fn options() -> EngineOptions {
        EngineOptions { page_size: 512 }
    }

    #[test]
    fn test_open_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.vault");
        let engine = StorageEngine::open(&path, EncryptionKey::generate().unwrap(), options()).unwrap();

        assert!(path.exists());
        assert!(engine.snapshot().unwrap().is_empty());
        assert_eq!(engine.page_size(), 512);
    }

    #[test]
    fn test_commit_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.vault");
        let key = EncryptionKey::generate().unwrap();

        let engine = StorageEngine::open(&path, key.clone(), options()).unwrap();
        let vault_id = engine.vault_id();
        let ticket = engine.begin_write(TIMEOUT).unwrap();
        engine.write_in(ticket.generation, b"k".to_vec(), b"v".to_vec()).unwrap();
        engine.commit(ticket).unwrap();
        drop(engine);

        let reopened = StorageEngine::open(&path, key, options()).unwrap();
        assert_eq!(reopened.vault_id(), vault_id);
        assert_eq!(reopened.snapshot().unwrap().get(b"k".as_slice()).unwrap(), b"v");
    }

    #[test]
    fn test_wrong_key_is_decryption_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.vault");
        StorageEngine::open(&path, EncryptionKey::generate().unwrap(), options()).unwrap();

        let result = StorageEngine::open(&path, EncryptionKey::generate().unwrap(), options());
        assert!(matches!(result, Err(VaultError::DecryptionFailure)));
    }

    #[test]
    fn test_rollback_discards_pending() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open(
            &dir.path().join("notes.vault"),
            EncryptionKey::generate().unwrap(),
            options(),
        )
        .unwrap();

        let ticket = engine.begin_write(TIMEOUT).unwrap();
        engine.write_in(ticket.generation, b"k".to_vec(), b"v".to_vec()).unwrap();
        assert_eq!(
            engine.read_in(ticket.generation, b"k").unwrap(),
            Some(b"v".to_vec())
        );
        engine.rollback(ticket).unwrap();

        assert!(engine.snapshot().unwrap().is_empty());
        assert!(!engine.is_write_active().unwrap());
    }

    #[test]
    fn test_stale_generation_rejected() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open(
            &dir.path().join("notes.vault"),
            EncryptionKey::generate().unwrap(),
            options(),
        )
        .unwrap();

        let ticket = engine.begin_write(TIMEOUT).unwrap();
        engine.commit(ticket).unwrap();

        assert!(matches!(
            engine.read_in(ticket.generation, b"k"),
            Err(VaultError::NoActiveTransaction)
        ));
        assert!(matches!(
            engine.write_in(ticket.generation, b"k".to_vec(), Vec::new()),
            Err(VaultError::NoActiveTransaction)
        ));
        assert!(matches!(
            engine.commit(ticket),
            Err(VaultError::NoActiveTransaction)
        ));
    }

    #[test]
    fn test_second_writer_times_out() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open(
            &dir.path().join("notes.vault"),
            EncryptionKey::generate().unwrap(),
            options(),
        )
        .unwrap();

        let ticket = engine.begin_write(TIMEOUT).unwrap();
        let other = Arc::clone(&engine);
        let result = thread::spawn(move || other.begin_write(Duration::from_millis(50)))
            .join()
            .unwrap();
        assert!(matches!(result, Err(VaultError::LockTimeout(_))));

        engine.rollback(ticket).unwrap();
    }

    #[test]
    fn test_rekey_requires_new_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.vault");
        let old_key = EncryptionKey::generate().unwrap();
        let new_key = EncryptionKey::generate().unwrap();

        let engine = StorageEngine::open(&path, old_key.clone(), options()).unwrap();
        let ticket = engine.begin_write(TIMEOUT).unwrap();
        engine.write_in(ticket.generation, b"k".to_vec(), b"v".to_vec()).unwrap();
        engine.commit(ticket).unwrap();

        engine.rekey(new_key.clone(), TIMEOUT).unwrap();
        assert!(!engine.is_write_active().unwrap());
        drop(engine);

        assert!(matches!(
            StorageEngine::open(&path, old_key, options()),
            Err(VaultError::DecryptionFailure)
        ));
        let reopened = StorageEngine::open(&path, new_key, options()).unwrap();
        assert_eq!(reopened.snapshot().unwrap().len(), 1);
    }

    #[test]
    fn test_open_removes_stale_temp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.vault");
        let stale = dir.path().join("notes.vault.42.tmp");
        fs::write(&stale, b"partial").unwrap();

        StorageEngine::open(&path, EncryptionKey::generate().unwrap(), options()).unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn test_open_restores_image_when_vault_file_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.vault");
        let key = EncryptionKey::generate().unwrap();
        {
            let engine = StorageEngine::open(&path, key.clone(), options()).unwrap();
            let ticket = engine.begin_write(TIMEOUT).unwrap();
            engine
                .write_in(ticket.generation, b"note/1".to_vec(), b"kept".to_vec())
                .unwrap();
            engine.commit(ticket).unwrap();
        }

        // Destination removed by the rename fallback, process gone before the retry.
        let temp = dir.path().join("notes.vault.77.tmp");
        let partial = dir.path().join("notes.vault.99.tmp");
        fs::rename(&path, &temp).unwrap();
        fs::write(&partial, b"torn").unwrap();

        let engine = StorageEngine::open(&path, key, options()).unwrap();
        assert_eq!(
            engine.snapshot().unwrap().get(b"note/1".as_slice()),
            Some(&b"kept".to_vec())
        );
        assert!(!temp.exists());
        assert!(!partial.exists());
    }

    #[test]
    fn test_closed_engine_refuses_writers() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open(
            &dir.path().join("notes.vault"),
            EncryptionKey::generate().unwrap(),
            options(),
        )
        .unwrap();
        engine.mark_closed();
        assert!(matches!(
            engine.begin_write(TIMEOUT),
            Err(VaultError::Storage(_))
        ));
    }
}
