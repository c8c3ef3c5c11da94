//! Typed note API over the transactional store.

use std::fmt;
use std::io::Write;
use std::ops::Bound;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};

use super::export::{write_notes, ExportFormat};
use super::keys::{
    self, decode_timestamp, decode_u64, encode_timestamp, encode_u64, CREATED_INDEX,
    META_CREATED_AT, META_LAST_MODIFIED, META_NEXT_NOTE_ID, NOTE_PREFIX, UPDATED_INDEX,
};
use super::record::{decode_note, encode_note};
use super::types::{
    DeletedFilter, Direction, NewNote, Note, NoteFilter, NoteId, NoteOrder, NotePatch, OrderField,
    TimeRange, VaultMetadata, VaultStats,
};
use super::validation::{validate_body, validate_title};
use crate::error::{Result, VaultError};
use crate::schema::{self, LATEST_VERSION};
use crate::storage::{
    prefix_upper_bound, KeyRead, Scan, ScanDirection, Snapshot, Transaction,
    TransactionCoordinator,
};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// CRUD and query API over notes.
///
/// Every write runs in its own transaction unless the `_in` form is used
/// with a caller-owned one. Timestamps are stored at microsecond precision.
#[derive(Clone)]
pub struct NoteRepository {
    coordinator: TransactionCoordinator,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for NoteRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoteRepository")
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl NoteRepository {
    /// Wrap a coordinator whose vault is fully migrated.
    ///
    /// Returns `SchemaOutdated` for any other schema version.
    pub fn new(coordinator: TransactionCoordinator) -> Result<Self> {
        schema::require_version(&coordinator.begin_read()?, LATEST_VERSION)?;
        Ok(Self {
            coordinator,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    pub fn create(&self, note: NewNote) -> Result<NoteId> {
        self.coordinator.run(|tx| self.create_in(tx, note))
    }

    pub fn create_in(&self, tx: &mut Transaction, note: NewNote) -> Result<NoteId> {
        validate_title(&note.title)?;
        validate_body(&note.body)?;

        let id = allocate_id(tx)?;
        let now = self.now();
        let note = Note {
            id,
            title: note.title,
            body: note.body,
            created_at: now,
            updated_at: now,
            deleted: false,
        };

        tx.write(keys::note_key(id), encode_note(&note)?)?;
        tx.write(keys::index_key(CREATED_INDEX, now, id), Vec::new())?;
        tx.write(keys::index_key(UPDATED_INDEX, now, id), Vec::new())?;
        touch(tx, now)?;

        tracing::debug!(note_id = %id, "Created note");
        Ok(id)
    }

    /// Insert a note carrying timestamps from elsewhere (legacy import).
    ///
    /// `updated_at` is raised to `created_at` if it is earlier.
    pub(crate) fn insert_existing_in(
        &self,
        tx: &mut Transaction,
        note: NewNote,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<NoteId> {
        validate_title(&note.title)?;
        validate_body(&note.body)?;

        let id = allocate_id(tx)?;
        let created_at = normalize(created_at);
        let updated_at = normalize(updated_at).max(created_at);
        let note = Note {
            id,
            title: note.title,
            body: note.body,
            created_at,
            updated_at,
            deleted: false,
        };

        tx.write(keys::note_key(id), encode_note(&note)?)?;
        tx.write(keys::index_key(CREATED_INDEX, created_at, id), Vec::new())?;
        tx.write(keys::index_key(UPDATED_INDEX, updated_at, id), Vec::new())?;
        touch(tx, self.now())?;
        Ok(id)
    }

    /// Fetch a note; soft-deleted notes are returned with `deleted` set.
    pub fn get(&self, id: NoteId) -> Result<Option<Note>> {
        self.get_in(&self.coordinator.begin_read()?, id)
    }

    pub fn get_in(&self, reader: &impl KeyRead, id: NoteId) -> Result<Option<Note>> {
        load(reader, id)
    }

    /// Apply `patch` to a live note.
    ///
    /// `updated_at` becomes the later of its previous value and the patch's
    /// suggestion (or now). Soft-deleted notes are `NotFound`.
    pub fn update(&self, id: NoteId, patch: NotePatch) -> Result<()> {
        self.coordinator.run(|tx| self.update_in(tx, id, patch))
    }

    pub fn update_in(&self, tx: &mut Transaction, id: NoteId, patch: NotePatch) -> Result<()> {
        let previous = load(&*tx, id)?
            .filter(|note| !note.deleted)
            .ok_or(VaultError::NotFound(id))?;

        let mut note = previous.clone();
        if let Some(title) = patch.title {
            validate_title(&title)?;
            note.title = title;
        }
        if let Some(body) = patch.body {
            validate_body(&body)?;
            note.body = body;
        }
        let suggested = patch
            .updated_at
            .map(normalize)
            .unwrap_or_else(|| self.now());
        note.updated_at = suggested.max(previous.updated_at);

        store(tx, &previous, &note)?;
        touch(tx, self.now())?;
        tracing::debug!(note_id = %id, "Updated note");
        Ok(())
    }

    /// Mark a note deleted. Already-deleted notes are left untouched.
    pub fn soft_delete(&self, id: NoteId) -> Result<()> {
        self.coordinator.run(|tx| self.soft_delete_in(tx, id))
    }

    pub fn soft_delete_in(&self, tx: &mut Transaction, id: NoteId) -> Result<()> {
        let previous = load(&*tx, id)?.ok_or(VaultError::NotFound(id))?;
        if previous.deleted {
            return Ok(());
        }

        let mut note = previous.clone();
        note.deleted = true;
        note.updated_at = self.now().max(previous.updated_at);

        store(tx, &previous, &note)?;
        touch(tx, self.now())?;
        tracing::debug!(note_id = %id, "Soft-deleted note");
        Ok(())
    }

    /// Lazily list notes over a read snapshot taken now.
    pub fn list(&self, filter: NoteFilter, order: NoteOrder) -> Result<NoteIter> {
        self.list_in(&self.coordinator.begin_read()?, filter, order)
    }

    pub fn list_in(
        &self,
        reader: &impl KeyRead,
        filter: NoteFilter,
        order: NoteOrder,
    ) -> Result<NoteIter> {
        let (index, range) = match order.field {
            OrderField::CreatedAt => (CREATED_INDEX, filter.created),
            OrderField::UpdatedAt => (UPDATED_INDEX, filter.updated),
        };
        let direction = match order.direction {
            Direction::Ascending => ScanDirection::Forward,
            Direction::Descending => ScanDirection::Reverse,
        };
        let (lower, upper) = index_bounds(index, &range);

        Ok(NoteIter {
            snapshot: reader.snapshot()?,
            index,
            entries: reader.range(lower, upper, direction)?,
            remaining: filter.limit,
            filter,
        })
    }

    /// Number of notes matching `filter` (its limit applies).
    pub fn count(&self, filter: &NoteFilter) -> Result<usize> {
        let mut total = 0;
        for note in self.list(filter.clone(), NoteOrder::default())? {
            note?;
            total += 1;
        }
        Ok(total)
    }

    /// Write every note matching `filter` to `writer`, oldest first, from a
    /// single read snapshot. Returns how many notes were written.
    pub fn export<W: Write>(
        &self,
        filter: NoteFilter,
        format: ExportFormat,
        writer: W,
    ) -> Result<usize> {
        let notes = self.list(filter, NoteOrder::default())?;
        let count = write_notes(notes, format, writer)?;
        tracing::info!(notes = count, format = format.extension(), "Exported notes");
        Ok(count)
    }

    pub fn stats(&self) -> Result<VaultStats> {
        let reader = self.coordinator.begin_read()?;
        let mut stats = VaultStats {
            file_size: self.coordinator.engine().file_size()?,
            ..VaultStats::default()
        };

        for (_, value) in reader.scan_prefix(NOTE_PREFIX, ScanDirection::Forward)? {
            let note = decode_note(&value)?;
            stats.total += 1;
            if note.deleted {
                stats.deleted += 1;
            } else {
                stats.active += 1;
            }
            stats.oldest = Some(stats.oldest.map_or(note.created_at, |t| t.min(note.created_at)));
            stats.newest = Some(stats.newest.map_or(note.created_at, |t| t.max(note.created_at)));
        }
        Ok(stats)
    }

    pub fn metadata(&self) -> Result<VaultMetadata> {
        let reader = self.coordinator.begin_read()?;
        let engine = self.coordinator.engine();
        let created_at = read_meta_timestamp(&reader, META_CREATED_AT)?;
        let last_modified = read_meta_timestamp(&reader, META_LAST_MODIFIED)?;

        Ok(VaultMetadata {
            vault_id: engine.vault_id(),
            format_version: engine.format_version(),
            schema_version: schema::read_version(&reader)?,
            created_at,
            last_modified,
        })
    }

    /// Operations that are not part of ordinary application flows.
    pub fn maintenance(&self) -> Maintenance<'_> {
        Maintenance { notes: self }
    }

    fn now(&self) -> DateTime<Utc> {
        normalize(self.clock.now())
    }
}

/// Destructive operations, kept apart from [`NoteRepository`].
#[derive(Debug, Clone, Copy)]
pub struct Maintenance<'a> {
    notes: &'a NoteRepository,
}

impl Maintenance<'_> {
    /// Permanently remove a note and its index entries. The id stays used.
    pub fn purge(&self, id: NoteId) -> Result<()> {
        self.notes.coordinator.run(|tx| self.purge_in(tx, id))
    }

    pub fn purge_in(&self, tx: &mut Transaction, id: NoteId) -> Result<()> {
        let note = load(&*tx, id)?.ok_or(VaultError::NotFound(id))?;
        tx.delete(&keys::note_key(id))?;
        tx.delete(&keys::index_key(CREATED_INDEX, note.created_at, id))?;
        tx.delete(&keys::index_key(UPDATED_INDEX, note.updated_at, id))?;
        touch(tx, self.notes.now())?;
        tracing::info!(note_id = %id, "Purged note");
        Ok(())
    }

    /// Purge every soft-deleted note; returns how many were removed.
    pub fn purge_deleted(&self) -> Result<usize> {
        self.notes.coordinator.run(|tx| {
            let deleted: Vec<NoteId> = self
                .notes
                .list_in(
                    &*tx,
                    NoteFilter::new().deleted(DeletedFilter::Deleted),
                    NoteOrder::default(),
                )?
                .map(|note| note.map(|n| n.id))
                .collect::<Result<_>>()?;
            for id in &deleted {
                self.purge_in(tx, *id)?;
            }
            Ok(deleted.len())
        })
    }
}

/// Lazy iterator of notes in index order.
pub struct NoteIter {
    snapshot: Arc<Snapshot>,
    index: &'static [u8],
    entries: Scan,
    filter: NoteFilter,
    remaining: Option<usize>,
}

impl Iterator for NoteIter {
    type Item = Result<Note>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        for (key, _) in self.entries.by_ref() {
            let Some(id) = keys::parse_index_key(self.index, &key) else {
                continue;
            };
            let Some(bytes) = self.snapshot.get(&keys::note_key(id)) else {
                return Some(Err(VaultError::Storage(format!(
                    "Index entry for missing note {}",
                    id
                ))));
            };
            let note = match decode_note(bytes) {
                Ok(note) => note,
                Err(err) => return Some(Err(err)),
            };
            if !self.filter.matches(&note) {
                continue;
            }
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }
            return Some(Ok(note));
        }
        None
    }
}

impl fmt::Debug for NoteIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoteIter")
            .field("entries", &self.entries)
            .field("filter", &self.filter)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

fn load(reader: &impl KeyRead, id: NoteId) -> Result<Option<Note>> {
    reader
        .get(&keys::note_key(id))?
        .map(|bytes| decode_note(&bytes))
        .transpose()
}

// Write `note` and move its updated-at index entry if the time changed.
fn store(tx: &mut Transaction, previous: &Note, note: &Note) -> Result<()> {
    tx.write(keys::note_key(note.id), encode_note(note)?)?;
    if previous.updated_at != note.updated_at {
        tx.delete(&keys::index_key(UPDATED_INDEX, previous.updated_at, note.id))?;
        tx.write(
            keys::index_key(UPDATED_INDEX, note.updated_at, note.id),
            Vec::new(),
        )?;
    }
    Ok(())
}

fn allocate_id(tx: &mut Transaction) -> Result<NoteId> {
    let next = tx
        .read(META_NEXT_NOTE_ID)?
        .ok_or_else(|| VaultError::Storage("Note id counter missing".to_string()))?;
    let id = decode_u64(&next)?;
    let following = id
        .checked_add(1)
        .ok_or_else(|| VaultError::Storage("Note id space exhausted".to_string()))?;
    tx.write(META_NEXT_NOTE_ID, encode_u64(following))?;
    Ok(NoteId::new(id))
}

fn touch(tx: &mut Transaction, now: DateTime<Utc>) -> Result<()> {
    tx.write(META_LAST_MODIFIED, encode_timestamp(now))
}

fn read_meta_timestamp(reader: &impl KeyRead, key: &[u8]) -> Result<DateTime<Utc>> {
    let bytes = reader.get(key)?.ok_or_else(|| {
        VaultError::Storage(format!(
            "Vault metadata missing: {}",
            String::from_utf8_lossy(key)
        ))
    })?;
    decode_timestamp(&bytes)
}

// Index keys hold whole microseconds, so both ends round up: the first
// stored time at or after `start`, and the first one not before `end`.
fn index_bounds(index: &[u8], range: &TimeRange) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let lower = match range.start {
        Some(start) => Bound::Included(keys::time_bound(index, ceil_micros(start))),
        None => Bound::Included(index.to_vec()),
    };
    let upper = match range.end {
        Some(end) => Bound::Excluded(keys::time_bound(index, ceil_micros(end))),
        None => prefix_upper_bound(index),
    };
    (lower, upper)
}

fn normalize(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

fn ceil_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    let floor = normalize(at);
    if floor == at {
        at
    } else {
        floor + chrono::Duration::microseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EncryptionKey;
    use crate::schema::Migrator;
    use crate::storage::{EngineOptions, StorageEngine};
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Clock that only moves when told to.
    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(
                Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            )))
        }

        fn advance(&self, seconds: i64) {
            *self.0.lock().unwrap() += Duration::seconds(seconds);
        }

        fn set(&self, at: DateTime<Utc>) {
            *self.0.lock().unwrap() = at;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn repository() -> (TempDir, NoteRepository, Arc<ManualClock>) {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::open(
            &dir.path().join("notes.vault"),
            EncryptionKey::generate().unwrap(),
            EngineOptions { page_size: 1024 },
        )
        .unwrap();
        let coordinator = TransactionCoordinator::new(engine);
        Migrator::builtin().unwrap().migrate(&coordinator).unwrap();
        let clock = ManualClock::new();
        let repo = NoteRepository::new(coordinator)
            .unwrap()
            .with_clock(clock.clone());
        (dir, repo, clock)
    }

    fn ids(iter: NoteIter) -> Vec<u64> {
        iter.map(|note| note.unwrap().id.get()).collect()
    }

    #[test]
    fn test_refuses_unmigrated_vault() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::open(
            &dir.path().join("notes.vault"),
            EncryptionKey::generate().unwrap(),
            EngineOptions::default(),
        )
        .unwrap();
        let result = NoteRepository::new(TransactionCoordinator::new(engine));
        assert!(matches!(
            result,
            Err(VaultError::SchemaOutdated { found: 0, .. })
        ));
    }

    #[test]
    fn test_create_and_get() {
        let (_dir, repo, clock) = repository();
        let id = repo.create(NewNote::new("A", "x")).unwrap();
        assert_eq!(id, NoteId::new(1));

        let note = repo.get(id).unwrap().unwrap();
        assert_eq!(note.title, "A");
        assert_eq!(note.body, "x");
        assert_eq!(note.created_at, clock.now());
        assert_eq!(note.updated_at, note.created_at);
        assert!(!note.deleted);

        assert!(repo.get(NoteId::new(99)).unwrap().is_none());
    }

    #[test]
    fn test_update_keeps_unpatched_fields() {
        let (_dir, repo, clock) = repository();
        let id = repo.create(NewNote::new("A", "x")).unwrap();
        clock.advance(5);

        repo.update(id, NotePatch::new().body("y")).unwrap();

        let note = repo.get(id).unwrap().unwrap();
        assert_eq!(note.title, "A");
        assert_eq!(note.body, "y");
        assert_eq!(note.updated_at, clock.now());
        assert!(note.updated_at > note.created_at);
    }

    #[test]
    fn test_update_clamps_backdated_timestamp() {
        let (_dir, repo, clock) = repository();
        let id = repo.create(NewNote::new("A", "x")).unwrap();
        clock.advance(10);
        repo.update(id, NotePatch::new().title("B")).unwrap();
        let before = repo.get(id).unwrap().unwrap().updated_at;

        let backdated = before - Duration::hours(1);
        repo.update(id, NotePatch::new().body("z").updated_at(backdated))
            .unwrap();
        assert_eq!(repo.get(id).unwrap().unwrap().updated_at, before);

        // A clock running backwards is clamped the same way.
        clock.set(before - Duration::days(1));
        repo.update(id, NotePatch::new().body("w")).unwrap();
        assert_eq!(repo.get(id).unwrap().unwrap().updated_at, before);
    }

    #[test]
    fn test_update_accepts_future_suggestion() {
        let (_dir, repo, clock) = repository();
        let id = repo.create(NewNote::new("A", "x")).unwrap();
        let later = clock.now() + Duration::minutes(3);

        repo.update(id, NotePatch::new().updated_at(later)).unwrap();
        assert_eq!(repo.get(id).unwrap().unwrap().updated_at, later);
    }

    #[test]
    fn test_update_missing_or_deleted_is_not_found() {
        let (_dir, repo, _clock) = repository();
        assert!(matches!(
            repo.update(NoteId::new(5), NotePatch::new().body("y")),
            Err(VaultError::NotFound(id)) if id == NoteId::new(5)
        ));

        let id = repo.create(NewNote::new("A", "x")).unwrap();
        repo.soft_delete(id).unwrap();
        assert!(matches!(
            repo.update(id, NotePatch::new().body("y")),
            Err(VaultError::NotFound(_))
        ));
        assert_eq!(repo.get(id).unwrap().unwrap().body, "x");
    }

    #[test]
    fn test_soft_delete_is_idempotent() {
        let (_dir, repo, clock) = repository();
        let id = repo.create(NewNote::new("A", "x")).unwrap();
        clock.advance(1);
        repo.soft_delete(id).unwrap();
        let first = repo.get(id).unwrap().unwrap();
        assert!(first.deleted);
        assert_eq!(first.updated_at, clock.now());

        clock.advance(1);
        repo.soft_delete(id).unwrap();
        assert_eq!(repo.get(id).unwrap().unwrap(), first);

        assert!(matches!(
            repo.soft_delete(NoteId::new(42)),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn test_ids_never_reused() {
        let (_dir, repo, _clock) = repository();
        let first = repo.create(NewNote::new("1", "")).unwrap();
        repo.soft_delete(first).unwrap();
        repo.maintenance().purge(first).unwrap();

        let second = repo.create(NewNote::new("2", "")).unwrap();
        assert!(second > first);
        assert!(repo.get(first).unwrap().is_none());
    }

    #[test]
    fn test_validation_failure_writes_nothing() {
        let (_dir, repo, _clock) = repository();
        let result = repo.create(NewNote::new("t".repeat(2000), "x"));
        assert!(matches!(result, Err(VaultError::Validation(_))));

        let id = repo.create(NewNote::new("ok", "x")).unwrap();
        assert_eq!(id, NoteId::new(1));
    }

    #[test]
    fn test_list_orders_with_id_tiebreak() {
        let (_dir, repo, clock) = repository();
        let a = repo.create(NewNote::new("a", "")).unwrap();
        let b = repo.create(NewNote::new("b", "")).unwrap();
        clock.advance(1);
        let c = repo.create(NewNote::new("c", "")).unwrap();

        let asc = ids(repo.list(NoteFilter::new(), NoteOrder::default()).unwrap());
        assert_eq!(asc, vec![a.get(), b.get(), c.get()]);

        let desc = ids(repo.list(NoteFilter::new(), NoteOrder::newest_first()).unwrap());
        assert_eq!(desc, vec![c.get(), b.get(), a.get()]);

        clock.advance(1);
        repo.update(a, NotePatch::new().body("edited")).unwrap();
        let recent = ids(
            repo.list(NoteFilter::new(), NoteOrder::recently_updated())
                .unwrap(),
        );
        assert_eq!(recent, vec![a.get(), c.get(), b.get()]);
    }

    #[test]
    fn test_list_filters_and_limit() {
        let (_dir, repo, clock) = repository();
        let start = clock.now();
        let mut created = Vec::new();
        for i in 0..5 {
            created.push(repo.create(NewNote::new(format!("n{}", i), "")).unwrap());
            clock.advance(10);
        }
        repo.soft_delete(created[1]).unwrap();

        let active = ids(repo.list(NoteFilter::active(), NoteOrder::default()).unwrap());
        assert_eq!(active, vec![1, 3, 4, 5]);

        let deleted = NoteFilter::new().deleted(DeletedFilter::Deleted);
        assert_eq!(ids(repo.list(deleted, NoteOrder::default()).unwrap()), vec![2]);

        let window = NoteFilter::new()
            .created_since(start + Duration::seconds(10))
            .created_before(start + Duration::seconds(30));
        assert_eq!(ids(repo.list(window, NoteOrder::default()).unwrap()), vec![2, 3]);

        let limited = NoteFilter::active().limit(2);
        assert_eq!(
            ids(repo.list(limited, NoteOrder::newest_first()).unwrap()),
            vec![5, 4]
        );

        assert_eq!(repo.count(&NoteFilter::new()).unwrap(), 5);
        assert_eq!(repo.count(&NoteFilter::active()).unwrap(), 4);
    }

    #[test]
    fn test_list_bounds_finer_than_stored_precision() {
        let (_dir, repo, clock) = repository();
        let at = clock.now();
        let id = repo.create(NewNote::new("a", "")).unwrap();
        let just_after = at + Duration::nanoseconds(500);

        let before = NoteFilter::new().created_before(just_after);
        assert!(before.matches(&repo.get(id).unwrap().unwrap()));
        assert_eq!(ids(repo.list(before, NoteOrder::default()).unwrap()), vec![id.get()]);

        let since = NoteFilter::new().updated_since(just_after);
        assert!(ids(repo.list(since, NoteOrder::recently_updated()).unwrap()).is_empty());

        let window = NoteFilter::new()
            .created_since(at - Duration::nanoseconds(1))
            .created_before(at + Duration::nanoseconds(1));
        assert_eq!(ids(repo.list(window, NoteOrder::newest_first()).unwrap()), vec![id.get()]);
    }

    #[test]
    fn test_list_is_a_snapshot() {
        let (_dir, repo, _clock) = repository();
        repo.create(NewNote::new("a", "")).unwrap();
        let mut listing = repo.list(NoteFilter::new(), NoteOrder::default()).unwrap();
        repo.create(NewNote::new("b", "")).unwrap();

        assert_eq!(listing.next().unwrap().unwrap().title, "a");
        assert!(listing.next().is_none());
    }

    #[test]
    fn test_in_transaction_forms_share_one_commit() {
        let (_dir, repo, _clock) = repository();
        let result: Result<()> = repo.coordinator().run(|tx| {
            let id = repo.create_in(tx, NewNote::new("a", "x"))?;
            repo.update_in(tx, id, NotePatch::new().body("y"))?;
            assert_eq!(repo.get_in(&*tx, id)?.unwrap().body, "y");
            Err(VaultError::Validation("abort".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(repo.count(&NoteFilter::new()).unwrap(), 0);

        repo.coordinator()
            .run(|tx| {
                let id = repo.create_in(tx, NewNote::new("a", "x"))?;
                repo.soft_delete_in(tx, id)
            })
            .unwrap();
        assert_eq!(repo.count(&NoteFilter::new()).unwrap(), 1);
        assert_eq!(repo.count(&NoteFilter::active()).unwrap(), 0);
    }

    #[test]
    fn test_export_sees_one_snapshot() {
        let (_dir, repo, clock) = repository();
        let first = repo.create(NewNote::new("a", "x")).unwrap();
        clock.advance(1);
        let second = repo.create(NewNote::new("b", "y")).unwrap();
        repo.soft_delete(second).unwrap();

        let mut out = Vec::new();
        let count = repo
            .export(NoteFilter::active(), ExportFormat::JsonLines, &mut out)
            .unwrap();
        assert_eq!(count, 1);

        let exported: Note = serde_json::from_slice(&out).unwrap();
        assert_eq!(exported, repo.get(first).unwrap().unwrap());

        let mut all = Vec::new();
        assert_eq!(
            repo.export(NoteFilter::new(), ExportFormat::Csv, &mut all).unwrap(),
            2
        );
    }

    #[test]
    fn test_purge_deleted() {
        let (_dir, repo, _clock) = repository();
        let keep = repo.create(NewNote::new("keep", "")).unwrap();
        for _ in 0..3 {
            let id = repo.create(NewNote::new("drop", "")).unwrap();
            repo.soft_delete(id).unwrap();
        }

        assert_eq!(repo.maintenance().purge_deleted().unwrap(), 3);
        assert_eq!(ids(repo.list(NoteFilter::new(), NoteOrder::default()).unwrap()), vec![keep.get()]);
        assert!(matches!(
            repo.maintenance().purge(NoteId::new(2)),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn test_stats_and_metadata() {
        let (_dir, repo, clock) = repository();
        let first_at = clock.now();
        repo.create(NewNote::new("a", "")).unwrap();
        clock.advance(60);
        let id = repo.create(NewNote::new("b", "")).unwrap();
        repo.soft_delete(id).unwrap();

        let stats = repo.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.oldest, Some(first_at));
        assert_eq!(stats.newest, Some(first_at + Duration::seconds(60)));
        assert!(stats.file_size > 0);

        let metadata = repo.metadata().unwrap();
        assert_eq!(metadata.schema_version, LATEST_VERSION);
        assert_eq!(metadata.last_modified, clock.now());
        assert_eq!(
            metadata.vault_id,
            repo.coordinator().engine().vault_id()
        );
    }
}
