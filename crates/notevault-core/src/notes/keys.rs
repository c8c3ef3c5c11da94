//! Key layout of the note store.
//!
//! ```text
//! meta/schema_version              u32 BE
//! meta/next_note_id                u64 BE
//! meta/created_at                  RFC 3339
//! meta/last_modified               RFC 3339
//! meta/legacy_import               RFC 3339, set once the plaintext import ran
//! note/<id u64 BE>                 versioned JSON record
//! idx/created/<micros>/<id u64 BE> empty
//! idx/updated/<micros>/<id u64 BE> empty
//! ```
//!
//! Timestamps in index keys are microseconds since the epoch with the sign
//! bit flipped, big-endian, so byte order equals time order (including
//! pre-1970 values).

use chrono::{DateTime, Utc};

use super::types::NoteId;
use crate::error::{Result, VaultError};

pub(crate) const META_SCHEMA_VERSION: &[u8] = b"meta/schema_version";
pub(crate) const META_NEXT_NOTE_ID: &[u8] = b"meta/next_note_id";
pub(crate) const META_CREATED_AT: &[u8] = b"meta/created_at";
pub(crate) const META_LAST_MODIFIED: &[u8] = b"meta/last_modified";
pub(crate) const META_LEGACY_IMPORT: &[u8] = b"meta/legacy_import";

pub(crate) const NOTE_PREFIX: &[u8] = b"note/";
pub(crate) const CREATED_INDEX: &[u8] = b"idx/created/";
pub(crate) const UPDATED_INDEX: &[u8] = b"idx/updated/";

const SIGN_FLIP: u64 = 1 << 63;

pub(crate) fn note_key(id: NoteId) -> Vec<u8> {
    let mut key = Vec::with_capacity(NOTE_PREFIX.len() + 8);
    key.extend_from_slice(NOTE_PREFIX);
    key.extend_from_slice(&id.get().to_be_bytes());
    key
}

pub(crate) fn parse_note_key(key: &[u8]) -> Option<NoteId> {
    let rest = key.strip_prefix(NOTE_PREFIX)?;
    Some(NoteId::new(u64::from_be_bytes(rest.try_into().ok()?)))
}

/// Index entry for `id` at time `at`.
pub(crate) fn index_key(index: &[u8], at: DateTime<Utc>, id: NoteId) -> Vec<u8> {
    let mut key = time_bound(index, at);
    key.extend_from_slice(&id.get().to_be_bytes());
    key
}

/// Index prefix for all entries at exactly `at`; used as a range bound.
pub(crate) fn time_bound(index: &[u8], at: DateTime<Utc>) -> Vec<u8> {
    let mut key = Vec::with_capacity(index.len() + 16);
    key.extend_from_slice(index);
    key.extend_from_slice(&encode_micros(at));
    key
}

pub(crate) fn parse_index_key(index: &[u8], key: &[u8]) -> Option<NoteId> {
    let rest = key.strip_prefix(index)?;
    if rest.len() != 16 {
        return None;
    }
    Some(NoteId::new(u64::from_be_bytes(rest[8..].try_into().ok()?)))
}

fn encode_micros(at: DateTime<Utc>) -> [u8; 8] {
    ((at.timestamp_micros() as u64) ^ SIGN_FLIP).to_be_bytes()
}

pub(crate) fn encode_u32(value: u32) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub(crate) fn decode_u32(bytes: &[u8]) -> Result<u32> {
    let array: [u8; 4] = bytes
        .try_into()
        .map_err(|_| VaultError::Storage("Invalid u32 metadata value".to_string()))?;
    Ok(u32::from_be_bytes(array))
}

pub(crate) fn encode_u64(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub(crate) fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| VaultError::Storage("Invalid u64 metadata value".to_string()))?;
    Ok(u64::from_be_bytes(array))
}

pub(crate) fn encode_timestamp(at: DateTime<Utc>) -> Vec<u8> {
    at.to_rfc3339().into_bytes()
}

pub(crate) fn decode_timestamp(bytes: &[u8]) -> Result<DateTime<Utc>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| VaultError::Storage(format!("Invalid timestamp: {}", e)))?;
    Ok(DateTime::parse_from_rfc3339(text)
        .map_err(|e| VaultError::Storage(format!("Invalid timestamp: {}", e)))?
        .with_timezone(&Utc))
}
