//! Dirty-record bookkeeping for an external sync collaborator.
//!
//! Every record store write marks the affected keys in `sync_queue` inside the same
//! transaction. An entry stays listed until the collaborator clears it. Re-marking an
//! entry bumps its revision, so [`SyncQueue::acknowledge`] can tell whether the record
//! changed again while a push was in flight. Conflict resolution is the collaborator's job.

use rusqlite::{params, Connection};
use serde::Serialize;
use std::sync::Arc;

use crate::db::Database;
use crate::error::{Result, StoreError};
use crate::store::{KeyKind, RecordKey, TableDescriptor};

/// The kind of mutation waiting to be pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOp {
    Upsert,
    Delete,
}

impl SyncOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "upsert" => Some(Self::Upsert),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// One record with un-synced local changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirtyEntry {
    pub table: String,
    pub key: RecordKey,
    pub op: SyncOp,
    /// Incremented each time the record is written while still dirty.
    pub revision: i64,
    /// RFC 3339 timestamp of the latest mutation.
    pub marked_at: String,
}

/// Record a local mutation. Runs on the caller's transaction.
pub(crate) fn mark(
    conn: &Connection,
    table: &str,
    key: &RecordKey,
    op: SyncOp,
) -> rusqlite::Result<()> {
    let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);
    conn.execute(
        "INSERT INTO sync_queue (table_name, record_key, key_kind, op, revision, marked_at) \
         VALUES (?1, ?2, ?3, ?4, 1, ?5) \
         ON CONFLICT(table_name, record_key) DO UPDATE SET \
             op = excluded.op, \
             key_kind = excluded.key_kind, \
             revision = sync_queue.revision + 1, \
             marked_at = excluded.marked_at",
        params![table, key.encode(), key.kind().as_str(), op.as_str(), now],
    )?;
    Ok(())
}

/// Read access to the dirty set plus the clear operations used after remote acknowledgement.
#[derive(Debug, Clone)]
pub struct SyncQueue {
    db: Arc<Database>,
}

impl SyncQueue {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Mark a record dirty outside of a record store write.
    pub fn mark_dirty(&self, table: &TableDescriptor, key: &RecordKey) -> Result<()> {
        check_key_kind(table, key)?;
        self.db
            .with_transaction(|tx| Ok(mark(tx, table.name, key, SyncOp::Upsert)?))
    }

    /// Every dirty record, oldest mutation first.
    pub fn list_dirty(&self) -> Result<Vec<DirtyEntry>> {
        self.db.read(|conn| {
            query_entries(
                conn,
                "SELECT table_name, record_key, key_kind, op, revision, marked_at FROM sync_queue \
                 ORDER BY marked_at, table_name, record_key",
                &[],
            )
        })
    }

    /// Dirty records of one table, oldest mutation first.
    pub fn list_dirty_for(&self, table: &TableDescriptor) -> Result<Vec<DirtyEntry>> {
        self.db.read(|conn| {
            query_entries(
                conn,
                "SELECT table_name, record_key, key_kind, op, revision, marked_at FROM sync_queue \
                 WHERE table_name = ?1 ORDER BY marked_at, record_key",
                &[&table.name],
            )
        })
    }

    pub fn pending_count(&self) -> Result<u64> {
        self.db.read(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    /// Clear a record unconditionally. Returns whether an entry was removed.
    pub fn clear(&self, table: &TableDescriptor, key: &RecordKey) -> Result<bool> {
        let removed = self.db.with_transaction(|tx| -> Result<usize> {
            Ok(tx.execute(
                "DELETE FROM sync_queue WHERE table_name = ?1 AND record_key = ?2",
                params![table.name, key.encode()],
            )?)
        })?;
        tracing::debug!(table = table.name, %key, removed, "dirty entry cleared");
        Ok(removed > 0)
    }

    /// Clear an entry only if it has not been re-marked since it was listed.
    ///
    /// Returns `false` when the record changed again; it stays dirty for the next pass.
    pub fn acknowledge(&self, entry: &DirtyEntry) -> Result<bool> {
        let removed = self.db.with_transaction(|tx| -> Result<usize> {
            Ok(tx.execute(
                "DELETE FROM sync_queue \
                 WHERE table_name = ?1 AND record_key = ?2 AND revision = ?3 AND marked_at = ?4",
                params![entry.table, entry.key.encode(), entry.revision, entry.marked_at],
            )?)
        })?;
        if removed == 0 {
            tracing::debug!(table = %entry.table, key = %entry.key, "entry re-marked during sync, keeping");
        }
        Ok(removed > 0)
    }
}

fn check_key_kind(table: &TableDescriptor, key: &RecordKey) -> Result<()> {
    if key.kind() == table.key.kind {
        Ok(())
    } else {
        Err(StoreError::validation(format!(
            "{} key {key} does not match table {:?}",
            key.kind().as_str(),
            table.name
        )))
    }
}

fn query_entries(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<DirtyEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let raw = stmt
        .query_map(args, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut entries = Vec::with_capacity(raw.len());
    for (table, record_key, key_kind, op, revision, marked_at) in raw {
        let key = KeyKind::parse(&key_kind).and_then(|kind| RecordKey::decode(kind, record_key));
        let op = SyncOp::parse(&op);
        match (key, op) {
            (Some(key), Some(op)) => entries.push(DirtyEntry {
                table,
                key,
                op,
                revision,
                marked_at,
            }),
            _ => tracing::warn!(%table, "skipping malformed sync_queue row"),
        }
    }
    Ok(entries)
}
