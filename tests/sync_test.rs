mod helpers;

use std::sync::Arc;

use hoard::error::StoreError;
use hoard::store::{Fields, Filter};
use hoard::sync::{SyncOp, SyncQueue};

use helpers::{index, memory_db, store, ITEMS, NOTES};

#[test]
fn every_write_is_observable_until_cleared() {
    let db = memory_db();
    let store = store(&db);
    let queue = SyncQueue::new(Arc::clone(&db));

    let a = store.insert(&NOTES, Fields::new().set("title", "a")).unwrap();
    let b = store.insert(&NOTES, Fields::new().set("title", "b")).unwrap();
    store
        .update(&NOTES, Fields::new().set("priority", 2), &Filter::eq("id", a.clone()))
        .unwrap();
    store.delete(&NOTES, &Filter::eq("id", b.clone())).unwrap();

    let dirty = queue.list_dirty_for(&NOTES).unwrap();
    assert_eq!(dirty.len(), 2);
    let entry_a = dirty.iter().find(|e| e.key == a).unwrap();
    let entry_b = dirty.iter().find(|e| e.key == b).unwrap();
    assert_eq!((entry_a.op, entry_a.revision), (SyncOp::Upsert, 2));
    assert_eq!(entry_b.op, SyncOp::Delete);

    for entry in &dirty {
        assert!(queue.acknowledge(entry).unwrap());
    }
    assert_eq!(queue.pending_count().unwrap(), 0);
}

#[test]
fn rolled_back_write_marks_nothing() {
    let db = memory_db();
    let store = store(&db);
    let queue = SyncQueue::new(Arc::clone(&db));

    let _ = store.with_transaction(|tx| {
        tx.insert(&NOTES, Fields::new().set("title", "never"))?;
        Err::<(), _>(StoreError::Validation("abort".into()))
    });
    assert!(queue.list_dirty().unwrap().is_empty());
}

#[test]
fn noop_update_marks_nothing() {
    let db = memory_db();
    let store = store(&db);
    let queue = SyncQueue::new(Arc::clone(&db));
    let changed = store
        .update(&NOTES, Fields::new().set("title", "x"), &Filter::eq("id", 404))
        .unwrap();
    assert_eq!(changed, 0);
    assert_eq!(queue.pending_count().unwrap(), 0);
}

#[test]
fn write_during_push_is_not_lost() {
    let db = memory_db();
    let index = index(&db, 2);
    let queue = SyncQueue::new(Arc::clone(&db));

    let key = index
        .store()
        .insert(&ITEMS, Fields::new().set("label", "doc"))
        .unwrap();
    let pushed = queue.list_dirty().unwrap();

    // Local edit lands after listing, before the remote acknowledges
    index.attach(&ITEMS, &key, &[0.5, 0.5]).unwrap();

    assert!(!queue.acknowledge(&pushed[0]).unwrap());
    let remaining = queue.list_dirty_for(&ITEMS).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].key, key);
}

#[test]
fn entries_are_scoped_per_table() {
    let db = memory_db();
    let store = store(&db);
    let queue = SyncQueue::new(Arc::clone(&db));
    store.insert(&NOTES, Fields::new().set("title", "n")).unwrap();
    store.insert(&ITEMS, Fields::new().set("label", "i")).unwrap();

    assert_eq!(queue.list_dirty_for(&NOTES).unwrap().len(), 1);
    assert_eq!(queue.list_dirty_for(&ITEMS).unwrap().len(), 1);
    assert_eq!(queue.list_dirty().unwrap().len(), 2);
}
