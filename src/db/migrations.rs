//! Forward-only schema migration framework.
//!
//! The schema version lives in `schema_meta` under `schema_version` (absent means 0).
//! [`MigrationManager::apply_pending`] runs every step whose target version is above the
//! stored one, in ascending order, one transaction per step. A step's action, the version
//! bump, and its `schema_migrations` history row commit together or not at all.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::borrow::Cow;

use super::Database;
use crate::error::MigrationError;
use crate::store::TableDescriptor;

/// A schema action implemented in Rust. Runs inside the step's transaction.
pub type MigrationFn = fn(&Connection) -> rusqlite::Result<()>;

/// What a migration step does to the schema.
#[derive(Clone)]
pub enum MigrationAction {
    /// A batch of SQL statements.
    Sql(Cow<'static, str>),
    /// Arbitrary work against the transaction (data backfills, conditional DDL).
    Func(MigrationFn),
}

impl std::fmt::Debug for MigrationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sql(sql) => f.debug_tuple("Sql").field(sql).finish(),
            Self::Func(_) => f.write_str("Func(..)"),
        }
    }
}

/// A versioned, one-time schema transformation.
#[derive(Debug, Clone)]
pub struct MigrationStep {
    pub target_version: u32,
    pub name: Cow<'static, str>,
    pub action: MigrationAction,
}

impl MigrationStep {
    pub const fn sql(target_version: u32, name: &'static str, sql: &'static str) -> Self {
        Self {
            target_version,
            name: Cow::Borrowed(name),
            action: MigrationAction::Sql(Cow::Borrowed(sql)),
        }
    }

    pub const fn func(target_version: u32, name: &'static str, action: MigrationFn) -> Self {
        Self {
            target_version,
            name: Cow::Borrowed(name),
            action: MigrationAction::Func(action),
        }
    }

    /// Create `table` exactly as described. Later column additions belong in later steps.
    pub fn create_table(target_version: u32, table: &TableDescriptor) -> Self {
        Self {
            target_version,
            name: Cow::Owned(format!("create table {}", table.name)),
            action: MigrationAction::Sql(Cow::Owned(table.create_sql())),
        }
    }

    fn run(&self, conn: &Connection) -> rusqlite::Result<()> {
        match &self.action {
            MigrationAction::Sql(sql) => conn.execute_batch(sql),
            MigrationAction::Func(action) => action(conn),
        }
    }
}

/// A row from `schema_migrations`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedMigration {
    pub version: u32,
    pub name: String,
    pub applied_at: String,
}

/// Applies migration steps against a [`Database`].
pub struct MigrationManager<'a> {
    db: &'a Database,
}

impl<'a> MigrationManager<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// The persisted schema version, 0 when none has been recorded.
    pub fn current_version(&self) -> Result<u32, MigrationError> {
        self.db.read(get_schema_version)
    }

    /// Apply every step with `target_version` above the current version.
    ///
    /// Returns the resulting version. Any failure is fatal: the failing step is rolled
    /// back, earlier steps stay committed, and the caller must not continue startup.
    pub fn apply_pending(&self, steps: &[MigrationStep]) -> Result<u32, MigrationError> {
        validate_plan(steps)?;

        let mut version = self.current_version()?;
        let latest = steps.last().map(|s| s.target_version).unwrap_or(0);
        tracing::debug!(schema_version = version, target = latest, "checking migrations");

        if version > latest && !steps.is_empty() {
            tracing::warn!(
                schema_version = version,
                latest_known = latest,
                "database schema is newer than every known migration"
            );
        }

        let start = version;
        for step in steps.iter().filter(|s| s.target_version > start) {
            tracing::info!(from = version, to = step.target_version, name = %step.name, "running migration");

            version = self.db.with_transaction(|tx| {
                // Another process may have migrated since the version was read
                let stored = get_schema_version(tx)?;
                if stored >= step.target_version {
                    return Ok(stored);
                }

                step.run(tx).map_err(|source| {
                    tracing::error!(version = step.target_version, name = %step.name, error = %source, "migration failed");
                    MigrationError::StepFailed {
                        version: step.target_version,
                        name: step.name.to_string(),
                        source,
                    }
                })?;

                update_schema_version(tx, step.target_version)?;
                record_history(tx, step)?;
                Ok::<_, MigrationError>(step.target_version)
            })?;
        }

        Ok(version)
    }

    /// Applied steps in ascending version order.
    pub fn history(&self) -> Result<Vec<AppliedMigration>, MigrationError> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT version, name, applied_at FROM schema_migrations ORDER BY version",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(AppliedMigration {
                        version: row.get(0)?,
                        name: row.get(1)?,
                        applied_at: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

/// Reject plans that are not strictly ascending or that target version 0.
fn validate_plan(steps: &[MigrationStep]) -> Result<(), MigrationError> {
    let mut previous = 0u32;
    for step in steps {
        if step.target_version == 0 {
            return Err(MigrationError::InvalidPlan(format!(
                "step {:?} targets version 0",
                step.name
            )));
        }
        if step.target_version <= previous {
            return Err(MigrationError::InvalidPlan(format!(
                "step {:?} targets v{} after v{}; versions must be strictly ascending",
                step.name, step.target_version, previous
            )));
        }
        previous = step.target_version;
    }
    Ok(())
}

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> Result<u32, MigrationError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        None => Ok(0),
        Some(val) => val
            .parse::<u32>()
            .map_err(|_| MigrationError::CorruptVersion(val)),
    }
}

/// Update the stored schema version.
fn update_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO schema_meta (key, value) VALUES ('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [version.to_string()],
    )?;
    Ok(())
}

fn record_history(conn: &Connection, step: &MigrationStep) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
        params![
            step.target_version,
            &*step.name,
            chrono::Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

/// Get the stored embedding model identifier, if any.
pub fn get_embedding_model(conn: &Connection) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'embedding_model'",
        [],
        |row| row.get::<_, String>(0),
    )
    .optional()
}

/// Set the stored embedding model identifier.
pub fn set_embedding_model(conn: &Connection, model: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('embedding_model', ?1)",
        [model],
    )?;
    Ok(())
}

/// Whether `table` currently has a column named `column`.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let mut rows = stmt.query([table])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
