mod helpers;

use hoard::config::HoardConfig;
use hoard::db::Database;
use hoard::error::StoreError;
use hoard::index::ModelStatus;
use hoard::store::{Fields, Filter};
use tempfile::TempDir;

use helpers::{steps, ITEMS, NOTES};

#[test]
fn open_creates_new_db_at_nonexistent_path() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("subdir").join("new.db");
    assert!(!db_path.exists());

    let db = Database::open(&db_path).unwrap();

    assert!(db_path.exists());
    assert_eq!(db.path(), Some(db_path.as_path()));
    let report = db.check_health().unwrap();
    assert!(report.integrity_ok);
    assert_eq!(report.schema_version, 0);
}

#[test]
fn file_database_uses_wal_and_busy_timeout() {
    let tmp = TempDir::new().unwrap();
    let db = Database::open(tmp.path().join("test.db")).unwrap();

    let report = db.check_health().unwrap();
    assert_eq!(report.journal_mode.to_lowercase(), "wal");

    let timeout: i64 = db
        .with_transaction(|tx| {
            Ok::<_, StoreError>(tx.pragma_query_value(None, "busy_timeout", |row| row.get(0))?)
        })
        .unwrap();
    assert_eq!(timeout, 5000);
}

#[test]
fn open_runs_migrations_from_config() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("config.toml");
    let db_path = tmp.path().join("data").join("hoard.db");
    std::fs::write(
        &config_path,
        format!(
            "[storage]\ndb_path = {:?}\n\n[embedding]\ndimensions = 2\n\n[search]\ndefault_top_k = 3\n",
            db_path.to_string_lossy()
        ),
    )
    .unwrap();
    let config = HoardConfig::load_from(&config_path).unwrap();

    let hoard = hoard::open(&config, [NOTES, ITEMS], &steps()).unwrap();
    let key = hoard
        .store()
        .insert(&NOTES, Fields::new().set("title", "hello"))
        .unwrap();
    hoard.index().attach(&NOTES, &key, &[0.6, 0.8]).unwrap();

    let report = hoard.database().check_health().unwrap();
    assert_eq!(report.schema_version, 2);
    assert_eq!(report.dirty_count, 1);
    assert!(db_path.exists());

    assert_eq!(hoard.index().check_model("any").unwrap(), ModelStatus::Unset);
    assert!(hoard.provider().is_none());
    assert!(matches!(
        hoard.search_text(&NOTES, "hello", &Filter::All),
        Err(StoreError::Validation(_))
    ));
    hoard.close().unwrap();
}

#[test]
fn failed_migration_blocks_startup() {
    use hoard::db::migrations::MigrationStep;
    let mut plan = steps();
    plan.push(MigrationStep::sql(3, "bad", "NOT SQL AT ALL"));

    let err = hoard::open_in_memory(&HoardConfig::default(), [NOTES, ITEMS], &plan)
        .err()
        .unwrap();
    assert!(err.to_string().contains("migration"));
}

#[test]
fn tables_not_registered_at_open_are_rejected() {
    let hoard = hoard::open_in_memory(&HoardConfig::default(), [NOTES], &steps()).unwrap();
    assert!(matches!(
        hoard.store().count(&ITEMS, &Filter::All),
        Err(StoreError::Validation(_))
    ));
}

#[test]
fn health_reports_recorded_model() {
    let hoard = hoard::open_in_memory(&HoardConfig::default(), [NOTES, ITEMS], &steps()).unwrap();
    hoard.index().set_model("all-MiniLM-L6-v2").unwrap();
    let report = hoard.database().check_health().unwrap();
    assert_eq!(report.embedding_model.as_deref(), Some("all-MiniLM-L6-v2"));
}
