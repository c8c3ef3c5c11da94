//! Built-in schema history.

use chrono::Utc;

use super::Migration;
use crate::error::Result;
use crate::notes::keys::{
    self, encode_timestamp, encode_u64, CREATED_INDEX, META_CREATED_AT, META_LAST_MODIFIED,
    META_NEXT_NOTE_ID, NOTE_PREFIX, UPDATED_INDEX,
};
use crate::notes::record::{decode_stored, encode_stored, NoteRecordV2, StoredNote};
use crate::notes::NoteId;
use crate::storage::{ScanDirection, Transaction};

/// Migration table, ordered by target version.
pub const BUILTIN_MIGRATIONS: &[Migration] = &[
    Migration {
        target: 1,
        name: "initialize_metadata",
        apply: initialize_metadata,
    },
    Migration {
        target: 2,
        name: "soft_delete_flag",
        apply: soft_delete_flag,
    },
    Migration {
        target: 3,
        name: "timestamp_indexes",
        apply: timestamp_indexes,
    },
];

/// Vault timestamps and the note id counter.
fn initialize_metadata(tx: &mut Transaction) -> Result<()> {
    let now = Utc::now();
    if tx.read(META_CREATED_AT)?.is_none() {
        tx.write(META_CREATED_AT, encode_timestamp(now))?;
    }
    if tx.read(META_LAST_MODIFIED)?.is_none() {
        tx.write(META_LAST_MODIFIED, encode_timestamp(now))?;
    }
    if tx.read(META_NEXT_NOTE_ID)?.is_none() {
        tx.write(META_NEXT_NOTE_ID, encode_u64(1))?;
    }
    Ok(())
}

/// Rewrite version 1 note records with an explicit `deleted = false`.
fn soft_delete_flag(tx: &mut Transaction) -> Result<()> {
    let mut upgraded = 0usize;
    for (key, value) in tx.scan_prefix(NOTE_PREFIX, ScanDirection::Forward)? {
        if let StoredNote::V1(record) = decode_stored(&value)? {
            let stored = StoredNote::V2(NoteRecordV2::from(record));
            tx.write(key, encode_stored(&stored)?)?;
            upgraded += 1;
        }
    }
    tracing::debug!(upgraded, "Added soft-delete flag to note records");
    Ok(())
}

/// Build the `created_at` and `updated_at` range indexes.
fn timestamp_indexes(tx: &mut Transaction) -> Result<()> {
    for index in [CREATED_INDEX, UPDATED_INDEX] {
        let stale: Vec<Vec<u8>> = tx
            .scan_prefix(index, ScanDirection::Forward)?
            .map(|(key, _)| key)
            .collect();
        for key in stale {
            tx.delete(&key)?;
        }
    }

    let mut indexed = 0usize;
    for (key, value) in tx.scan_prefix(NOTE_PREFIX, ScanDirection::Forward)? {
        let Some(id) = keys::parse_note_key(&key) else {
            continue;
        };
        let StoredNote::V2(record) = decode_stored(&value)? else {
            continue;
        };
        tx.write(
            keys::index_key(CREATED_INDEX, record.created_at, id),
            Vec::new(),
        )?;
        tx.write(
            keys::index_key(UPDATED_INDEX, record.updated_at, id),
            Vec::new(),
        )?;
        indexed += 1;
    }
    tracing::debug!(indexed, "Built timestamp indexes");
    Ok(())
}
