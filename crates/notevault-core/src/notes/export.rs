//! Plaintext export of notes.
//!
//! Exported bytes are not encrypted; the caller decides where they go.

use std::io::Write;
use std::str::FromStr;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use super::types::Note;
use crate::error::{Result, VaultError};

/// Output format for [`write_notes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    /// One JSON object per line
    #[default]
    JsonLines,
    /// A single pretty-printed JSON array
    Json,
    /// Header row, then one row per note
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::JsonLines => "jsonl",
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "jsonl" => Ok(ExportFormat::JsonLines),
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(VaultError::InvalidInput(format!(
                "Unsupported export format: {} (use csv, json or jsonl)",
                other
            ))),
        }
    }
}

/// One CSV row. Timestamps are RFC 3339 with microseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvRow {
    pub id: u64,
    pub created_at: String,
    pub updated_at: String,
    pub deleted: bool,
    pub title: String,
    pub body: String,
}

impl From<&Note> for CsvRow {
    fn from(note: &Note) -> Self {
        Self {
            id: note.id.get(),
            created_at: note.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            updated_at: note.updated_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            deleted: note.deleted,
            title: note.title.clone(),
            body: note.body.clone(),
        }
    }
}

/// Write `notes` to `writer` in `format`; returns how many were written.
///
/// Stops at the first error from the iterator.
pub fn write_notes<W, I>(notes: I, format: ExportFormat, mut writer: W) -> Result<usize>
where
    W: Write,
    I: IntoIterator<Item = Result<Note>>,
{
    let mut count = 0;
    match format {
        ExportFormat::JsonLines => {
            for note in notes {
                serde_json::to_writer(&mut writer, &note?)?;
                writer.write_all(b"\n")?;
                count += 1;
            }
        }
        ExportFormat::Json => {
            let all = notes.into_iter().collect::<Result<Vec<_>>>()?;
            serde_json::to_writer_pretty(&mut writer, &all)?;
            writer.write_all(b"\n")?;
            count = all.len();
        }
        ExportFormat::Csv => {
            let mut csv = csv::Writer::from_writer(&mut writer);
            for note in notes {
                csv.serialize(CsvRow::from(&note?)).map_err(csv_error)?;
                count += 1;
            }
            csv.flush()?;
        }
    }
    writer.flush()?;
    Ok(count)
}

fn csv_error(err: csv::Error) -> VaultError {
    VaultError::Storage(format!("CSV export failed: {}", err))
}
