//! One-time import of a plaintext SQLite notes database.
//!
//! Older installs kept notes in an unencrypted SQLite file with a `notes`
//! table (`title`, `body`, `created_at`, optionally `updated_at`).
//! Timestamps may be integers (milliseconds since the epoch) or RFC 3339
//! text. The import copies every row into the vault in one transaction,
//! records a marker so it never runs twice, then deletes the plaintext file
//! together with its `-wal` and `-shm` companions.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};

use crate::error::{Result, VaultError};
use crate::notes::keys::{encode_timestamp, META_LEGACY_IMPORT};
use crate::notes::{NewNote, NoteRepository};

/// Outcome of [`import_legacy_sqlite`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyImport {
    /// An earlier run already completed
    AlreadyDone,
    /// No plaintext database existed; marked done
    NothingToImport,
    /// Rows copied into the vault
    Imported { notes: usize },
}

#[derive(Debug)]
struct LegacyRow {
    title: String,
    body: String,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

/// Import notes from the plaintext database at `path`.
pub fn import_legacy_sqlite(notes: &NoteRepository, path: &Path) -> Result<LegacyImport> {
    let coordinator = notes.coordinator();
    if coordinator.begin_read()?.read(META_LEGACY_IMPORT)?.is_some() {
        tracing::debug!("Legacy import already completed, skipping");
        return Ok(LegacyImport::AlreadyDone);
    }

    if !path.exists() {
        tracing::info!("No legacy database found, marking import as done");
        coordinator.run(|tx| tx.write(META_LEGACY_IMPORT, encode_timestamp(Utc::now())))?;
        return Ok(LegacyImport::NothingToImport);
    }

    tracing::info!("Found plaintext legacy database, starting import");
    let rows = read_rows(path)?;

    let imported = coordinator.run(|tx| {
        for row in &rows {
            notes.insert_existing_in(
                tx,
                NewNote::new(row.title.clone(), row.body.clone()),
                row.created_at,
                row.updated_at.unwrap_or(row.created_at),
            )?;
        }
        tx.write(META_LEGACY_IMPORT, encode_timestamp(Utc::now()))?;
        Ok(rows.len())
    })?;

    remove_plaintext(path)?;
    tracing::info!(notes = imported, "Legacy import complete; plaintext removed");
    Ok(LegacyImport::Imported { notes: imported })
}

fn read_rows(path: &Path) -> Result<Vec<LegacyRow>> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let has_table: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'notes')",
        [],
        |row| row.get(0),
    )?;
    if !has_table {
        return Err(VaultError::InvalidInput(
            "Legacy database has no notes table".to_string(),
        ));
    }

    let mut columns = conn.prepare("SELECT name FROM pragma_table_info('notes')")?;
    let has_updated_at = columns
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .iter()
        .any(|name| name == "updated_at");

    let sql = if has_updated_at {
        "SELECT title, body, created_at, updated_at FROM notes ORDER BY rowid"
    } else {
        "SELECT title, body, created_at, NULL FROM notes ORDER BY rowid"
    };
    let mut stmt = conn.prepare(sql)?;
    let raw = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Value>(2)?,
                row.get::<_, Value>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    raw.into_iter()
        .map(|(title, body, created_at, updated_at)| {
            let created_at = parse_timestamp(&created_at)?
                .ok_or_else(|| VaultError::Validation("Legacy note has no created_at".to_string()))?;
            Ok(LegacyRow {
                title: title.unwrap_or_default(),
                body: body.unwrap_or_default(),
                created_at,
                updated_at: parse_timestamp(&updated_at)?,
            })
        })
        .collect()
}

fn parse_timestamp(value: &Value) -> Result<Option<DateTime<Utc>>> {
    match value {
        Value::Null => Ok(None),
        Value::Integer(millis) => DateTime::from_timestamp_millis(*millis)
            .map(Some)
            .ok_or_else(|| VaultError::Validation(format!("Timestamp out of range: {}", millis))),
        Value::Text(text) => DateTime::parse_from_rfc3339(text)
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(|e| VaultError::Validation(format!("Invalid legacy timestamp: {}", e))),
        _ => Err(VaultError::Validation(
            "Unsupported legacy timestamp type".to_string(),
        )),
    }
}

fn remove_plaintext(path: &Path) -> Result<()> {
    for file in companion_paths(path) {
        match fs::remove_file(&file) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(VaultError::Storage(format!(
                    "Failed to remove {}: {}",
                    file.display(),
                    err
                )))
            }
        }
    }
    Ok(())
}

fn companion_paths(path: &Path) -> Vec<PathBuf> {
    let mut paths = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        paths.push(PathBuf::from(name));
    }
    paths
}
