//! SQL DDL for the bookkeeping tables.
//!
//! Defines `schema_meta`, `schema_migrations`, and `sync_queue`. Domain tables are
//! created by migration steps. All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Key/value metadata: schema_version, embedding_model
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- One row per applied migration step
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);

-- Records with local mutations not yet acknowledged by the sync collaborator
CREATE TABLE IF NOT EXISTS sync_queue (
    table_name TEXT NOT NULL,
    record_key TEXT NOT NULL,
    key_kind TEXT NOT NULL CHECK(key_kind IN ('integer','text')),
    op TEXT NOT NULL CHECK(op IN ('upsert','delete')),
    revision INTEGER NOT NULL DEFAULT 1,
    marked_at TEXT NOT NULL,
    PRIMARY KEY (table_name, record_key)
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_marked ON sync_queue(marked_at);
"#;

/// Initialize the bookkeeping tables. Idempotent.
///
/// The schema version is left absent; an absent version reads as 0.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"schema_meta".to_string()));
        assert!(tables.contains(&"schema_migrations".to_string()));
        assert!(tables.contains(&"sync_queue".to_string()));
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // second call should not error
    }

    #[test]
    fn sync_queue_rejects_unknown_op() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO sync_queue (table_name, record_key, key_kind, op, marked_at) \
             VALUES ('notes', '1', 'integer', 'merge', '2024-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
    }
}
