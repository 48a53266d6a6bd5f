mod helpers;

use std::sync::mpsc;
use std::thread;

use hoard::error::StoreError;
use hoard::store::{Direction, Fields, Filter, QueryOptions, RecordKey};
use tempfile::TempDir;

use helpers::{file_db, index, memory_db, store, unit_vector, ITEMS, NOTES};

fn note(title: &str) -> Fields {
    Fields::new().set("title", title)
}

#[test]
fn insert_then_delete_in_one_transaction_leaves_nothing() {
    let tmp = TempDir::new().unwrap();
    let db = file_db(tmp.path());
    let index = index(&db, 4);
    let store = index.store().clone();

    store
        .with_transaction(|tx| {
            let key = tx.insert(&NOTES, note("ephemeral"))?;
            index.attach_in(tx, &NOTES, &key, &unit_vector(4, 0))?;
            tx.delete(&NOTES, &Filter::eq("id", key))?;
            Ok::<_, StoreError>(())
        })
        .unwrap();

    assert_eq!(store.count(&NOTES, &Filter::All).unwrap(), 0);
    assert!(index
        .load_candidates(&NOTES, &Filter::All, None)
        .unwrap()
        .is_empty());
}

#[test]
fn uncommitted_writes_are_invisible_to_readers() {
    let tmp = TempDir::new().unwrap();
    let db = file_db(tmp.path());
    let writer_store = store(&db);
    let reader_store = store(&db);

    let (inserted_tx, inserted_rx) = mpsc::channel();
    let (proceed_tx, proceed_rx) = mpsc::channel::<()>();

    let writer = thread::spawn(move || {
        writer_store.with_transaction(|tx| {
            tx.insert(&NOTES, note("pending"))?;
            inserted_tx.send(()).unwrap();
            proceed_rx.recv().unwrap();
            Ok::<_, StoreError>(())
        })
    });

    inserted_rx.recv().unwrap();
    // The reader runs on its own connection and does not wait for the writer
    assert_eq!(reader_store.count(&NOTES, &Filter::All).unwrap(), 0);
    proceed_tx.send(()).unwrap();
    writer.join().unwrap().unwrap();

    assert_eq!(reader_store.count(&NOTES, &Filter::All).unwrap(), 1);
}

#[test]
fn failed_transaction_is_fully_rolled_back() {
    let tmp = TempDir::new().unwrap();
    let db = file_db(tmp.path());
    let store = store(&db);
    store.insert(&NOTES, note("kept")).unwrap();

    let result = store.with_transaction(|tx| {
        tx.insert(&NOTES, note("lost"))?;
        tx.update(&NOTES, note("renamed"), &Filter::All)?;
        Err::<(), _>(StoreError::Validation("caller abort".into()))
    });
    assert!(result.is_err());

    let rows = store.query(&NOTES, &Filter::All, &QueryOptions::new()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_text("title"), Some("kept"));
}

#[test]
fn unique_violation_leaves_row_count_unchanged() {
    let db = memory_db();
    let store = store(&db);
    store
        .insert(&NOTES, note("one").set("slug", "dup"))
        .unwrap();
    let before = store.count(&NOTES, &Filter::All).unwrap();

    let err = store
        .with_transaction(|tx| {
            tx.insert(&NOTES, note("two"))?;
            tx.insert(&NOTES, note("three").set("slug", "dup"))
        })
        .unwrap_err();

    assert!(matches!(err, StoreError::Constraint(_)));
    assert_eq!(store.count(&NOTES, &Filter::All).unwrap(), before);
}

#[test]
fn pagination_is_exact() {
    let db = memory_db();
    let store = store(&db);
    for i in 0..23 {
        store
            .insert(&NOTES, note(&format!("n{i:02}")).set("priority", i % 4))
            .unwrap();
    }

    let mut seen: Vec<RecordKey> = Vec::new();
    let mut offset = 0;
    loop {
        let page = store
            .query(
                &NOTES,
                &Filter::All,
                &QueryOptions::new()
                    .order_by("priority", Direction::Desc)
                    .limit(5)
                    .offset(offset),
            )
            .unwrap();
        if page.is_empty() {
            break;
        }
        offset += page.len();
        seen.extend(page.into_iter().map(|r| r.key().clone()));
    }

    assert_eq!(seen.len(), 23);
    let mut unique = seen.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 23);
}

#[test]
fn filters_compose() {
    let db = memory_db();
    let store = store(&db);
    store
        .insert(&NOTES, note("alpha").set("pinned", true).set("priority", 1))
        .unwrap();
    store
        .insert(&NOTES, note("beta").set("pinned", false).set("priority", 5))
        .unwrap();
    store.insert(&NOTES, note("gamma")).unwrap();

    let pinned_or_urgent = Filter::eq("pinned", true).or(Filter::ge("priority", 5));
    assert_eq!(store.count(&NOTES, &pinned_or_urgent).unwrap(), 2);

    let rows = store
        .query(&NOTES, &Filter::is_null("priority"), &QueryOptions::new())
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_text("title"), Some("gamma"));

    let like = store
        .query(&NOTES, &Filter::like("title", "%a"), &QueryOptions::new())
        .unwrap();
    assert_eq!(like.len(), 3);

    let listed = store
        .query(
            &NOTES,
            &Filter::in_list("title", ["alpha", "gamma"]).and(Filter::ne("title", "gamma")),
            &QueryOptions::new(),
        )
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get_bool("pinned"), Some(true));
}

#[test]
fn data_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let key = {
        let db = file_db(tmp.path());
        store(&db).insert(&NOTES, note("durable")).unwrap()
    };

    let db = file_db(tmp.path());
    let row = store(&db).get(&NOTES, &key).unwrap().unwrap();
    assert_eq!(row.get_text("title"), Some("durable"));
}

#[test]
fn concurrent_writers_are_serialized() {
    let tmp = TempDir::new().unwrap();
    let db = file_db(tmp.path());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = store(&db);
            thread::spawn(move || {
                for i in 0..25 {
                    store
                        .insert(&NOTES, note(&format!("t{t}-{i}")))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store(&db).count(&NOTES, &Filter::All).unwrap(), 100);
}

#[test]
fn write_outside_transaction_handle_is_rejected_not_deadlocked() {
    let db = memory_db();
    let index = index(&db, 2);
    let (done_tx, done_rx) = mpsc::channel();

    thread::spawn(move || {
        let result = index.store().with_transaction(|tx| {
            let key = tx.insert(&ITEMS, Fields::new().set("label", "outer"))?;
            index.attach(&ITEMS, &key, &[1.0, 0.0])
        });
        let remaining = index.store().count(&ITEMS, &Filter::All);
        done_tx.send((result, remaining)).unwrap();
    });

    let (result, remaining) = done_rx
        .recv_timeout(std::time::Duration::from_secs(5))
        .expect("nested write blocked on the writer lock");
    assert!(matches!(result, Err(StoreError::Validation(_))));
    // The failed body rolled back the outer insert too
    assert_eq!(remaining.unwrap(), 0);
}
