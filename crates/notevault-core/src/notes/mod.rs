//! Note records: types, storage layout, the repository and export.

pub mod export;
pub(crate) mod keys;
pub(crate) mod record;
mod repository;
mod types;
pub mod validation;

pub use export::ExportFormat;
pub use repository::{Clock, Maintenance, NoteIter, NoteRepository, SystemClock};
pub use types::{
    DeletedFilter, Direction, NewNote, Note, NoteFilter, NoteId, NoteOrder, NotePatch,
    OrderField, TimeRange, VaultMetadata, VaultStats,
};
