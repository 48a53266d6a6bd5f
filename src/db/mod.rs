//! Storage session: one owned handle per database file.
//!
//! [`Database`] serializes writers behind a single connection and hands readers their own
//! read-only connections, matching SQLite's WAL concurrency model. Every mutation goes
//! through [`Database::with_transaction`].

pub mod migrations;
pub mod schema;

use anyhow::{Context, Result as AnyResult};
use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use serde::Serialize;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::config::StorageConfig;
use crate::error::{MigrationError, Result, StoreError};

/// An open database. Owns the writer connection and a pool of reader connections.
pub struct Database {
    path: Option<PathBuf>,
    writer: Mutex<Connection>,
    /// Thread currently holding `writer`, so re-entry fails instead of deadlocking.
    writer_owner: Mutex<Option<ThreadId>>,
    readers: Mutex<Vec<Connection>>,
    reader_pool_size: usize,
    busy_timeout: Duration,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("reader_pool_size", &self.reader_pool_size)
            .finish_non_exhaustive()
    }
}

/// Result of [`Database::check_health`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub integrity_ok: bool,
    pub schema_version: u32,
    pub journal_mode: String,
    pub dirty_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

impl Database {
    /// Open (or create) a database at the given path with default storage settings.
    pub fn open(path: impl AsRef<Path>) -> AnyResult<Self> {
        Self::open_with(path, &StorageConfig::default())
    }

    /// Open (or create) a database at the given path.
    ///
    /// Creates the parent directory, enables WAL and foreign keys, and initializes the
    /// bookkeeping tables. Domain tables are created by migrations, not here.
    pub fn open_with(path: impl AsRef<Path>, config: &StorageConfig) -> AnyResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;

        // WAL lets readers proceed while a single writer commits
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(busy_timeout)?;

        schema::init_schema(&conn).context("failed to initialize schema")?;

        tracing::info!(path = %path.display(), "database opened");
        Ok(Self {
            path: Some(path.to_path_buf()),
            writer: Mutex::new(conn),
            writer_owner: Mutex::new(None),
            readers: Mutex::new(Vec::new()),
            reader_pool_size: config.reader_pool_size,
            busy_timeout,
        })
    }

    /// Open a private in-memory database. Reads share the writer connection.
    pub fn open_in_memory() -> AnyResult<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::init_schema(&conn).context("failed to initialize schema")?;
        Ok(Self {
            path: None,
            writer: Mutex::new(conn),
            writer_owner: Mutex::new(None),
            readers: Mutex::new(Vec::new()),
            reader_pool_size: 0,
            busy_timeout: Duration::from_millis(5000),
        })
    }

    /// Path of the database file, or `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `body` inside a write transaction.
    ///
    /// Commits when `body` returns `Ok`, rolls back on `Err` or panic. Only one write
    /// transaction runs at a time; others block on the writer lock. Work issued from
    /// inside `body` must go through the transaction: a second writer acquisition on the
    /// same thread fails with [`StoreError::Validation`] instead of blocking forever.
    pub fn with_transaction<T, E>(
        &self,
        body: impl FnOnce(&Transaction<'_>) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.lock_writer()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;

        match body(&tx) {
            Ok(value) => {
                tx.commit().map_err(StoreError::from)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    tracing::error!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Run a read against a reader connection.
    ///
    /// File-backed databases use pooled read-only connections so reads do not wait on an
    /// in-flight writer. In-memory databases read through the writer connection.
    pub fn read<T, E>(
        &self,
        body: impl FnOnce(&Connection) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        let Some(path) = self.path.as_deref() else {
            let conn = self.lock_writer()?;
            return body(&conn);
        };

        let pooled = self
            .readers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        let conn = match pooled {
            Some(conn) => conn,
            None => self.open_reader(path)?,
        };

        let result = body(&conn);

        let mut pool = self
            .readers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if pool.len() < self.reader_pool_size {
            pool.push(conn);
        }
        result
    }

    fn open_reader(&self, path: &Path) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.busy_timeout)?;
        tracing::trace!(path = %path.display(), "reader connection opened");
        Ok(conn)
    }

    fn lock_writer(&self) -> Result<WriterGuard<'_>> {
        let me = thread::current().id();
        if *self.lock_owner() == Some(me) {
            tracing::warn!("writer re-entered from the thread that already holds it");
            return Err(StoreError::validation(
                "nested transaction; use the StoreTx passed to the transaction body",
            ));
        }

        // A panicking transaction body rolls back on unwind, so the connection is still usable.
        let conn = self.writer.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("writer lock poisoned by a panicked transaction, recovering");
            poisoned.into_inner()
        });
        *self.lock_owner() = Some(me);
        Ok(WriterGuard {
            conn,
            owner: &self.writer_owner,
        })
    }

    fn lock_owner(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.writer_owner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run integrity and bookkeeping checks.
    pub fn check_health(&self) -> Result<HealthReport> {
        self.read(|conn| {
            let integrity: String =
                conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
            let journal_mode: String =
                conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
            let schema_version =
                migrations::get_schema_version(conn).map_err(|e| match e {
                    MigrationError::Storage(e) => StoreError::from(e),
                    other => StoreError::validation(other.to_string()),
                })?;
            let dirty_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
            let embedding_model = migrations::get_embedding_model(conn)?;

            Ok(HealthReport {
                integrity_ok: integrity == "ok",
                schema_version,
                journal_mode,
                dirty_count: dirty_count as u64,
                embedding_model,
            })
        })
    }

    /// Close all connections, surfacing any error from the writer.
    pub fn close(self) -> Result<()> {
        let readers = self
            .readers
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        drop(readers);

        let writer = self
            .writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.close().map_err(|(_, err)| StoreError::from(err))?;
        tracing::info!(path = ?self.path, "database closed");
        Ok(())
    }
}

/// Exclusive access to the writer connection, tagged with the owning thread.
struct WriterGuard<'a> {
    conn: MutexGuard<'a, Connection>,
    owner: &'a Mutex<Option<ThreadId>>,
}

impl Deref for WriterGuard<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for WriterGuard<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        // Cleared before `conn` is released so the next owner never sees a stale id
        *self.owner.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}
