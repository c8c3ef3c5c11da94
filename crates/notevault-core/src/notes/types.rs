//! Core data types for the note repository.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a note.
///
/// Allocated from a persisted counter; never reused, even after purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(u64);

impl NoteId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier for this note
    pub id: NoteId,

    /// Title (may be empty)
    pub title: String,

    /// Body text
    pub body: String,

    /// When this note was created
    pub created_at: DateTime<Utc>,

    /// Last modification; never earlier than `created_at`, never decreases
    pub updated_at: DateTime<Utc>,

    /// Soft-delete flag
    pub deleted: bool,
}

/// Builder for creating new notes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewNote {
    pub title: String,
    pub body: String,
}

impl NewNote {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Partial update of a note. Cannot express `id` or `created_at`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotePatch {
    /// New title
    pub title: Option<String>,

    /// New body
    pub body: Option<String>,

    /// Suggested modification time; clamped so it never moves backwards
    pub updated_at: Option<DateTime<Utc>>,
}

impl NotePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }
}

/// Which notes a listing includes by deletion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletedFilter {
    #[default]
    All,
    Active,
    Deleted,
}

impl DeletedFilter {
    pub fn matches(self, deleted: bool) -> bool {
        match self {
            DeletedFilter::All => true,
            DeletedFilter::Active => !deleted,
            DeletedFilter::Deleted => deleted,
        }
    }
}

/// Half-open time range `[start, end)`; either side may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at < end)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Filter for listing notes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteFilter {
    /// Deletion state to include
    pub deleted: DeletedFilter,

    /// Range on `created_at`
    pub created: TimeRange,

    /// Range on `updated_at`
    pub updated: TimeRange,

    /// Maximum number of results
    pub limit: Option<usize>,
}

impl NoteFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclude soft-deleted notes.
    pub fn active() -> Self {
        Self::new().deleted(DeletedFilter::Active)
    }

    pub fn deleted(mut self, deleted: DeletedFilter) -> Self {
        self.deleted = deleted;
        self
    }

    pub fn created_since(mut self, at: DateTime<Utc>) -> Self {
        self.created.start = Some(at);
        self
    }

    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created.end = Some(at);
        self
    }

    pub fn updated_since(mut self, at: DateTime<Utc>) -> Self {
        self.updated.start = Some(at);
        self
    }

    pub fn updated_before(mut self, at: DateTime<Utc>) -> Self {
        self.updated.end = Some(at);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, note: &Note) -> bool {
        self.deleted.matches(note.deleted)
            && self.created.contains(note.created_at)
            && self.updated.contains(note.updated_at)
    }
}

/// Timestamp a listing is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderField {
    #[default]
    CreatedAt,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// Ordering of a listing. Ties on the timestamp are broken by id in the
/// same direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NoteOrder {
    pub field: OrderField,
    pub direction: Direction,
}

impl NoteOrder {
    pub fn new(field: OrderField, direction: Direction) -> Self {
        Self { field, direction }
    }

    pub fn newest_first() -> Self {
        Self::new(OrderField::CreatedAt, Direction::Descending)
    }

    pub fn recently_updated() -> Self {
        Self::new(OrderField::UpdatedAt, Direction::Descending)
    }
}

/// Vault-level metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultMetadata {
    /// Identifier written into the file header
    pub vault_id: Uuid,

    /// Container format version
    pub format_version: u16,

    /// Schema version of the stored records
    pub schema_version: u32,

    /// When this vault was initialized
    pub created_at: DateTime<Utc>,

    /// Last committed note change (informational)
    pub last_modified: DateTime<Utc>,
}

/// Summary counts for a vault.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultStats {
    pub total: usize,
    pub active: usize,
    pub deleted: usize,
    /// Earliest `created_at` of any note
    pub oldest: Option<DateTime<Utc>>,
    /// Latest `created_at` of any note
    pub newest: Option<DateTime<Utc>>,
    /// Size of the encrypted file in bytes
    pub file_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn note(created: i64, updated: i64, deleted: bool) -> Note {
        Note {
            id: NoteId::new(1),
            title: String::new(),
            body: String::new(),
            created_at: at(created),
            updated_at: at(updated),
            deleted,
        }
    }

    #[test]
    fn test_note_patch_builder() {
        let now = Utc::now();
        let patch = NotePatch::new().title("A").body("x").updated_at(now);

        assert_eq!(patch.title.as_deref(), Some("A"));
        assert_eq!(patch.body.as_deref(), Some("x"));
        assert_eq!(patch.updated_at, Some(now));
        assert_eq!(NotePatch::new(), NotePatch::default());
    }

    #[test]
    fn test_time_range_is_half_open() {
        let range = TimeRange::new(Some(at(0)), Some(at(10)));
        assert!(range.contains(at(0)));
        assert!(range.contains(at(9)));
        assert!(!range.contains(at(10)));
        assert!(!range.contains(at(0) - Duration::seconds(1)));
        assert!(TimeRange::default().contains(at(-1000)));
    }

    #[test]
    fn test_note_filter_builder() {
        let filter = NoteFilter::active()
            .created_since(at(0))
            .updated_before(at(5))
            .limit(10);

        assert_eq!(filter.deleted, DeletedFilter::Active);
        assert_eq!(filter.created.start, Some(at(0)));
        assert_eq!(filter.updated.end, Some(at(5)));
        assert_eq!(filter.limit, Some(10));
    }

    #[test]
    fn test_note_filter_matches() {
        assert!(NoteFilter::new().matches(&note(0, 0, true)));
        assert!(!NoteFilter::active().matches(&note(0, 0, true)));
        assert!(NoteFilter::new()
            .deleted(DeletedFilter::Deleted)
            .matches(&note(0, 0, true)));
        assert!(!NoteFilter::new()
            .updated_since(at(5))
            .matches(&note(0, 4, false)));
    }

    #[test]
    fn test_default_order_is_created_ascending() {
        let order = NoteOrder::default();
        assert_eq!(order.field, OrderField::CreatedAt);
        assert_eq!(order.direction, Direction::Ascending);
    }

    #[test]
    fn test_note_id_display() {
        assert_eq!(NoteId::new(42).to_string(), "42");
        assert_eq!(NoteId::new(42).get(), 42);
    }
}
