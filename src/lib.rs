//! Local-first data layer: versioned migrations, a transactional record store with
//! dirty tracking, and brute-force embedding similarity search, all over one SQLite file.
//!
//! # Architecture
//!
//! - **Storage**: SQLite (WAL) behind one owned [`db::Database`] session: a single writer
//!   connection plus a pool of read-only readers
//! - **Schema**: ordered [`db::migrations::MigrationStep`]s applied exactly once, each in
//!   its own transaction
//! - **Records**: typed [`store::TableDescriptor`]s; every value is a bound parameter
//! - **Search**: vectors stored on their record's row, ranked by cosine similarity in memory
//! - **Sync**: every write marks the record in `sync_queue` until an external
//!   collaborator acknowledges it
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`db`]: Storage session, base schema, migrations, and health checks
//! - [`store`]: Generic record CRUD over registered table descriptors
//! - [`index`]: Embedding attach/load, cosine ranking, and re-indexing
//! - [`embedding`]: Embedding provider trait and the remote HTTP provider
//! - [`sync`]: Dirty-record bookkeeping
//!
//! # Example
//!
//! ```no_run
//! use hoard::config::HoardConfig;
//! use hoard::db::migrations::MigrationStep;
//! use hoard::store::{ColumnDef, ColumnType, Fields, KeyColumn, KeyKind, TableDescriptor};
//!
//! const COLUMNS: &[ColumnDef] = &[ColumnDef::new("title", ColumnType::Text).required()];
//! const NOTES: TableDescriptor = TableDescriptor::new(
//!     "notes",
//!     KeyColumn { name: "id", kind: KeyKind::Integer },
//!     COLUMNS,
//! );
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = HoardConfig::load()?;
//! hoard::logging::init(&config.logging);
//! let steps = [MigrationStep::create_table(1, &NOTES)];
//! let hoard = hoard::open(&config, [NOTES], &steps)?;
//! hoard.store().insert(&NOTES, Fields::new().set("title", "first"))?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub mod logging;
pub mod store;
pub mod sync;

use anyhow::{Context, Result};
use std::sync::Arc;

use config::{HoardConfig, SearchConfig};
use db::migrations::{MigrationManager, MigrationStep};
use db::Database;
use embedding::EmbeddingProvider;
use error::StoreError;
use index::{EmbeddingIndex, ModelStatus, Ranking, ReindexOptions, ReindexReport};
use store::{Filter, RecordStore, TableDescriptor};
use sync::SyncQueue;

/// The assembled data layer: one session shared by every component.
pub struct Hoard {
    db: Arc<Database>,
    store: RecordStore,
    index: EmbeddingIndex,
    sync: SyncQueue,
    provider: Option<Box<dyn EmbeddingProvider>>,
    search: SearchConfig,
}

/// Open the configured database, apply `steps`, and build the components.
///
/// A failed migration is fatal: the error is returned and nothing else is constructed.
pub fn open(
    config: &HoardConfig,
    tables: impl IntoIterator<Item = TableDescriptor>,
    steps: &[MigrationStep],
) -> Result<Hoard> {
    let path = config.resolved_db_path();
    let db = Database::open_with(&path, &config.storage)?;
    assemble(db, config, tables, steps)
}

/// Like [`open`] but against a private in-memory database.
pub fn open_in_memory(
    config: &HoardConfig,
    tables: impl IntoIterator<Item = TableDescriptor>,
    steps: &[MigrationStep],
) -> Result<Hoard> {
    assemble(Database::open_in_memory()?, config, tables, steps)
}

fn assemble(
    db: Database,
    config: &HoardConfig,
    tables: impl IntoIterator<Item = TableDescriptor>,
    steps: &[MigrationStep],
) -> Result<Hoard> {
    let version = MigrationManager::new(&db)
        .apply_pending(steps)
        .context("schema migration failed, refusing to start")?;

    let db = Arc::new(db);
    let store = RecordStore::new(Arc::clone(&db), tables)?;
    let index = EmbeddingIndex::new(store.clone(), config.embedding.dimensions)?;
    let sync = SyncQueue::new(Arc::clone(&db));
    let provider = embedding::create_provider(&config.embedding)?;

    if let Some(provider) = &provider {
        if let ModelStatus::Changed { stored } = index.check_model(provider.model())? {
            tracing::warn!(%stored, configured = provider.model(), "stored vectors predate the configured model");
        }
    }

    tracing::info!(schema_version = version, "hoard ready");
    Ok(Hoard {
        db,
        store,
        index,
        sync,
        provider,
        search: config.search.clone(),
    })
}

impl Hoard {
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    pub fn sync(&self) -> &SyncQueue {
        &self.sync
    }

    pub fn provider(&self) -> Option<&dyn EmbeddingProvider> {
        self.provider.as_deref()
    }

    /// Embed `text` with the configured provider and return the default number of hits.
    pub fn search_text(
        &self,
        table: &TableDescriptor,
        text: &str,
        filter: &Filter,
    ) -> Result<Ranking, StoreError> {
        let provider = self.require_provider()?;
        self.index
            .search_text(provider, table, text, filter, self.search.default_top_k)
    }

    /// Re-embed `table` with the configured provider and batch size.
    pub fn reindex(
        &self,
        table: &TableDescriptor,
        only_missing: bool,
    ) -> Result<ReindexReport, StoreError> {
        let provider = self.require_provider()?;
        let options = ReindexOptions {
            batch_size: self.search.reindex_batch_size,
            only_missing,
            cancel: None,
        };
        self.index.reindex(table, provider, &options)
    }

    /// Release every connection, surfacing close errors.
    pub fn close(self) -> Result<()> {
        let Hoard {
            db,
            store,
            index,
            sync,
            ..
        } = self;
        drop((index, store, sync));
        match Arc::try_unwrap(db) {
            Ok(db) => db.close()?,
            Err(_) => tracing::debug!("database still shared, closing on last drop"),
        }
        Ok(())
    }

    fn require_provider(&self) -> Result<&dyn EmbeddingProvider, StoreError> {
        self.provider().ok_or_else(|| {
            StoreError::validation("no embedding provider configured (embedding.provider = \"none\")")
        })
    }
}
