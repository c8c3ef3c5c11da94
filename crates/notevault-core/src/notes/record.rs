//! Stored note records, tagged with their schema version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{Note, NoteId};
use crate::error::{Result, VaultError};

/// Note layout before soft delete existed (schema 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct NoteRecordV1 {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Current note layout (schema 2 onwards).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct NoteRecordV2 {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record_version")]
pub(crate) enum StoredNote {
    #[serde(rename = "1")]
    V1(NoteRecordV1),
    #[serde(rename = "2")]
    V2(NoteRecordV2),
}

impl From<NoteRecordV1> for NoteRecordV2 {
    fn from(v1: NoteRecordV1) -> Self {
        Self {
            id: v1.id,
            title: v1.title,
            body: v1.body,
            created_at: v1.created_at,
            updated_at: v1.updated_at,
            deleted: false,
        }
    }
}

impl TryFrom<StoredNote> for Note {
    type Error = VaultError;

    fn try_from(stored: StoredNote) -> Result<Self> {
        match stored {
            StoredNote::V2(record) => Ok(Note {
                id: NoteId::new(record.id),
                title: record.title,
                body: record.body,
                created_at: record.created_at,
                updated_at: record.updated_at,
                deleted: record.deleted,
            }),
            StoredNote::V1(record) => Err(VaultError::Storage(format!(
                "Note {} still has a version 1 record",
                record.id
            ))),
        }
    }
}

impl From<&Note> for StoredNote {
    fn from(note: &Note) -> Self {
        StoredNote::V2(NoteRecordV2 {
            id: note.id.get(),
            title: note.title.clone(),
            body: note.body.clone(),
            created_at: note.created_at,
            updated_at: note.updated_at,
            deleted: note.deleted,
        })
    }
}

pub(crate) fn decode_stored(bytes: &[u8]) -> Result<StoredNote> {
    serde_json::from_slice(bytes)
        .map_err(|e| VaultError::Storage(format!("Invalid note record: {}", e)))
}

pub(crate) fn encode_stored(stored: &StoredNote) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(stored)?)
}

pub(crate) fn decode_note(bytes: &[u8]) -> Result<Note> {
    Note::try_from(decode_stored(bytes)?)
}

pub(crate) fn encode_note(note: &Note) -> Result<Vec<u8>> {
    encode_stored(&StoredNote::from(note))
}
