//! Schema versioning and migrations.
//!
//! The stored schema version lives under `meta/schema_version`. Each
//! migration step has a strictly increasing target version and runs in its
//! own write transaction that also records the new version, so an
//! interrupted run leaves the vault at the last committed step.

mod migrations;

use crate::error::{Result, VaultError};
use crate::notes::keys::{decode_u32, encode_u32, META_SCHEMA_VERSION};
use crate::storage::{KeyRead, Transaction, TransactionCoordinator};

pub use migrations::BUILTIN_MIGRATIONS;

/// Schema version this build reads and writes.
pub const LATEST_VERSION: u32 = 3;

/// Data transformation for one migration step.
pub type MigrationFn = fn(&mut Transaction) -> Result<()>;

/// One entry of the migration table.
#[derive(Clone, Copy)]
pub struct Migration {
    /// Version the vault is at once this step commits
    pub target: u32,
    pub name: &'static str,
    pub apply: MigrationFn,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("target", &self.target)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Outcome of a [`Migrator::migrate`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    /// Targets of the steps that actually ran
    pub applied: Vec<u32>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Applies an ordered migration table.
#[derive(Debug, Clone)]
pub struct Migrator {
    steps: Vec<Migration>,
}

impl Migrator {
    /// Build a migrator over `steps`.
    ///
    /// Targets must be non-zero and strictly increasing.
    pub fn new(steps: Vec<Migration>) -> Result<Self> {
        let mut previous = 0;
        for step in &steps {
            if step.target <= previous {
                return Err(VaultError::InvalidInput(format!(
                    "Migration '{}' targets version {} after version {}",
                    step.name, step.target, previous
                )));
            }
            previous = step.target;
        }
        Ok(Self { steps })
    }

    /// The built-in schema history.
    pub fn builtin() -> Result<Self> {
        Self::new(BUILTIN_MIGRATIONS.to_vec())
    }

    pub fn steps(&self) -> &[Migration] {
        &self.steps
    }

    /// Highest target in the table (0 when empty).
    pub fn latest_version(&self) -> u32 {
        self.steps.last().map_or(0, |step| step.target)
    }

    /// Bring the vault up to [`latest_version`](Self::latest_version).
    ///
    /// Re-running on a migrated vault is a no-op. A failing step aborts the
    /// run with `VaultError::Migration`; earlier steps stay committed.
    pub fn migrate(&self, coordinator: &TransactionCoordinator) -> Result<MigrationReport> {
        let latest = self.latest_version();
        let start = read_version(&coordinator.begin_read()?)?;
        if start > latest {
            return Err(VaultError::SchemaOutdated {
                found: start,
                expected: latest,
            });
        }

        tracing::info!(
            current_version = start,
            target_version = latest,
            "Checking vault migrations"
        );

        let mut applied = Vec::new();
        let mut version = start;
        for step in self.steps.iter().filter(|step| step.target > start) {
            if let Some(reached) = self.apply_step(coordinator, step, version)? {
                applied.push(reached);
            }
            version = version.max(step.target);
        }

        let to_version = read_version(&coordinator.begin_read()?)?;
        if !applied.is_empty() {
            tracing::info!(from = start, to = to_version, "Migrations complete");
        }

        Ok(MigrationReport {
            from_version: start,
            to_version,
            applied,
        })
    }

    fn apply_step(
        &self,
        coordinator: &TransactionCoordinator,
        step: &Migration,
        expected_from: u32,
    ) -> Result<Option<u32>> {
        let failed = |from_version: u32, cause: VaultError| VaultError::Migration {
            from_version,
            to_version: step.target,
            cause: Box::new(cause),
        };

        let mut tx = coordinator
            .begin_with_retry()
            .map_err(|e| failed(expected_from, e))?;

        // A concurrent migrate call may have got here first.
        let current = read_version(&tx).map_err(|e| failed(expected_from, e))?;
        if current >= step.target {
            tracing::debug!(version = step.target, "Migration already applied, skipping");
            tx.rollback();
            return Ok(None);
        }

        tracing::info!(version = step.target, name = step.name, "Running migration");
        let result = (step.apply)(&mut tx).and_then(|_| write_version(&mut tx, step.target));
        if let Err(err) = result {
            tx.rollback();
            tracing::error!(
                from = current,
                to = step.target,
                error = %err,
                "Migration failed"
            );
            return Err(failed(current, err));
        }

        tx.commit().map_err(|e| failed(current, e))?;
        Ok(Some(step.target))
    }
}

/// Stored schema version; a vault that never ran a migration is at 0.
pub fn read_version(reader: &impl KeyRead) -> Result<u32> {
    match reader.get(META_SCHEMA_VERSION)? {
        Some(bytes) => decode_u32(&bytes),
        None => Ok(0),
    }
}

pub(crate) fn write_version(tx: &mut Transaction, version: u32) -> Result<()> {
    tx.write(META_SCHEMA_VERSION, encode_u32(version))
}

/// Refuse to serve a vault whose schema is not exactly `expected`.
pub fn require_version(reader: &impl KeyRead, expected: u32) -> Result<()> {
    let found = read_version(reader)?;
    if found != expected {
        return Err(VaultError::SchemaOutdated { found, expected });
    }
    Ok(())
}
