use pokedex_core::db::open_db;
use pokedex_core::{
    Fields, KvRecordRepository, MemoryKvStore, RecordId, RecordRepository, SqliteKvStore,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;
const CREATES_PER_THREAD: usize = 25;

#[test]
fn concurrent_creates_on_shared_memory_store_get_distinct_ids() {
    let store = Arc::new(MemoryKvStore::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles = (0..THREADS)
        .map(|worker| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let repo = KvRecordRepository::new(store);
                barrier.wait();
                create_many(&repo, worker)
            })
        })
        .collect::<Vec<_>>();

    assert_all_distinct(handles);
}

#[test]
fn concurrent_creates_across_sqlite_connections_get_distinct_ids() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pokedex.db");
    // Bootstrap once so workers do not race on the first migration.
    drop(open_db(&path).unwrap());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles = (0..THREADS)
        .map(|worker| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                let store = SqliteKvStore::try_new(&conn).unwrap();
                let repo = KvRecordRepository::new(store);
                barrier.wait();
                create_many(&repo, worker)
            })
        })
        .collect::<Vec<_>>();

    assert_all_distinct(handles);

    let conn = open_db(&path).unwrap();
    let repo = KvRecordRepository::new(SqliteKvStore::try_new(&conn).unwrap());
    assert_eq!(repo.list().unwrap().len(), THREADS * CREATES_PER_THREAD);
}

#[test]
fn ids_keep_increasing_after_reopening_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pokedex.db");

    let first = create_in_fresh_connection(&path, "Pikachu");
    let second = create_in_fresh_connection(&path, "Bulbasaur");
    {
        let conn = open_db(&path).unwrap();
        let repo = KvRecordRepository::new(SqliteKvStore::try_new(&conn).unwrap());
        repo.delete(second).unwrap();
    }
    let third = create_in_fresh_connection(&path, "Charmander");

    assert_eq!(
        [first.get(), second.get(), third.get()],
        [1, 2, 3],
        "deleted ids must not be handed out again"
    );
}

fn create_in_fresh_connection(path: &Path, name: &str) -> RecordId {
    let conn = open_db(path).unwrap();
    let repo = KvRecordRepository::new(SqliteKvStore::try_new(&conn).unwrap());
    repo.create(fields(json!({ "name": name }))).unwrap().id
}

fn create_many(repo: &impl RecordRepository, worker: usize) -> Vec<RecordId> {
    (0..CREATES_PER_THREAD)
        .map(|index| {
            repo.create(fields(json!({ "worker": worker, "index": index })))
                .unwrap()
                .id
        })
        .collect()
}

fn assert_all_distinct(handles: Vec<thread::JoinHandle<Vec<RecordId>>>) {
    let ids = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect::<Vec<_>>();
    let unique = ids.iter().copied().collect::<HashSet<_>>();

    assert_eq!(ids.len(), THREADS * CREATES_PER_THREAD);
    assert_eq!(unique.len(), ids.len(), "allocator handed out duplicate ids");
    assert_eq!(
        unique.iter().map(|id| id.get()).max(),
        Some((THREADS * CREATES_PER_THREAD) as i64)
    );
}

fn fields(value: Value) -> Fields {
    match value {
        Value::Object(fields) => fields,
        other => panic!("fixture must be an object, got {other}"),
    }
}
