#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use hoard::db::migrations::{MigrationManager, MigrationStep};
use hoard::db::Database;
use hoard::index::EmbeddingIndex;
use hoard::store::{
    ColumnDef, ColumnType, EmbeddingSpec, KeyColumn, KeyKind, RecordStore, TableDescriptor,
};

pub const NOTE_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("title", ColumnType::Text).required(),
    ColumnDef::new("slug", ColumnType::Text).unique(),
    ColumnDef::new("pinned", ColumnType::Bool),
    ColumnDef::new("priority", ColumnType::Integer),
];

/// Integer-keyed notes with an embedding sourced from the title.
pub const NOTES: TableDescriptor = TableDescriptor::new(
    "notes",
    KeyColumn {
        name: "id",
        kind: KeyKind::Integer,
    },
    NOTE_COLUMNS,
)
.with_embedding(EmbeddingSpec {
    column: "embedding",
    dim_column: "embedding_dim",
    source_column: Some("title"),
});

pub const ITEM_COLUMNS: &[ColumnDef] = &[ColumnDef::new("label", ColumnType::Text).required()];

/// Text-keyed items with a 2-d embedding, for the ranking scenarios.
pub const ITEMS: TableDescriptor = TableDescriptor::new(
    "items",
    KeyColumn {
        name: "id",
        kind: KeyKind::Text,
    },
    ITEM_COLUMNS,
)
.with_embedding(EmbeddingSpec {
    column: "embedding",
    dim_column: "embedding_dim",
    source_column: None,
});

pub fn steps() -> Vec<MigrationStep> {
    vec![
        MigrationStep::create_table(1, &NOTES),
        MigrationStep::create_table(2, &ITEMS),
    ]
}

/// Open a file-backed database under `dir` with both test tables migrated.
pub fn file_db(dir: &Path) -> Arc<Database> {
    let db = Database::open(dir.join("hoard.db")).unwrap();
    MigrationManager::new(&db).apply_pending(&steps()).unwrap();
    Arc::new(db)
}

/// Fresh in-memory database with both test tables migrated.
pub fn memory_db() -> Arc<Database> {
    let db = Database::open_in_memory().unwrap();
    MigrationManager::new(&db).apply_pending(&steps()).unwrap();
    Arc::new(db)
}

pub fn store(db: &Arc<Database>) -> RecordStore {
    RecordStore::new(Arc::clone(db), [NOTES, ITEMS]).unwrap()
}

pub fn index(db: &Arc<Database>, dimension: usize) -> EmbeddingIndex {
    EmbeddingIndex::new(store(db), dimension).unwrap()
}

/// A `dim`-dimensional vector with a single 1.0 at `axis`.
pub fn unit_vector(dim: usize, axis: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dim];
    v[axis % dim] = 1.0;
    v
}
