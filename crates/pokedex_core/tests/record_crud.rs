use chrono::DateTime;
use pokedex_core::db::open_db_in_memory;
use pokedex_core::{
    EmptyListPolicy, Fields, KvRecordRepository, KvStore, MemoryKvStore, RecordId,
    RecordRepository, RepoError, RepositoryOptions, SqliteKvStore, UpdateMode, COLLECTION,
};
use serde_json::{json, Value};
use std::collections::HashSet;

#[test]
fn create_and_get_roundtrip() {
    let repo = KvRecordRepository::new(MemoryKvStore::new());

    let created = repo.create(fields(json!({"name": "Pikachu", "type": "electric"}))).unwrap();
    assert_eq!(created.id.get(), 1);

    let loaded = repo.get(created.id).unwrap();
    assert_eq!(loaded, created.record);
    assert_eq!(loaded.get("name"), Some(&json!("Pikachu")));
    assert_eq!(loaded.get("type"), Some(&json!("electric")));
    assert_eq!(loaded.id(), Some(created.id));

    let created_at = loaded.created_at().expect("createdAt is stamped");
    assert!(created_at.ends_with('Z'));
    DateTime::parse_from_rfc3339(created_at).expect("createdAt is ISO-8601");
    assert_eq!(loaded.fields().len(), 4);
}

#[test]
fn create_overwrites_caller_supplied_metadata() {
    let repo = KvRecordRepository::new(MemoryKvStore::new());

    let created = repo
        .create(fields(json!({"name": "Mew", "id": 151, "createdAt": "1996-02-27"})))
        .unwrap();

    assert_eq!(created.id.get(), 1);
    assert_eq!(created.record.get("id"), Some(&json!(1)));
    assert_ne!(created.record.created_at(), Some("1996-02-27"));
}

#[test]
fn get_missing_returns_not_found() {
    let repo = KvRecordRepository::new(MemoryKvStore::new());
    let id = RecordId::new(42).unwrap();

    let err = repo.get(id).unwrap_err();
    assert!(matches!(err, RepoError::NotFound(missing) if missing == id));
}

#[test]
fn list_on_empty_collection_is_an_error_by_default() {
    let repo = KvRecordRepository::new(MemoryKvStore::new());
    assert!(matches!(repo.list(), Err(RepoError::EmptyCollection)));
}

#[test]
fn list_on_empty_collection_can_succeed_by_policy() {
    let options = RepositoryOptions {
        empty_list: EmptyListPolicy::EmptyOk,
        ..RepositoryOptions::default()
    };
    let repo = KvRecordRepository::with_options(MemoryKvStore::new(), options);
    assert!(repo.list().unwrap().is_empty());
}

#[test]
fn list_returns_exactly_the_created_records() {
    let repo = KvRecordRepository::new(MemoryKvStore::new());
    let mut expected = HashSet::new();
    for name in ["Bulbasaur", "Charmander", "Squirtle"] {
        expected.insert(repo.create(fields(json!({"name": name}))).unwrap().id);
    }

    let listed = repo
        .list()
        .unwrap()
        .into_iter()
        .map(|record| record.id().unwrap())
        .collect::<HashSet<_>>();
    assert_eq!(listed, expected);
}

#[test]
fn list_ignores_the_allocator_counter() {
    let store = MemoryKvStore::new();
    let repo = KvRecordRepository::new(&store);
    repo.create(fields(json!({"name": "Onix"}))).unwrap();

    assert_eq!(store.len().unwrap(), 2);
    assert_eq!(repo.list().unwrap().len(), 1);
}

#[test]
fn update_replaces_whole_record() {
    let repo = KvRecordRepository::new(MemoryKvStore::new());
    let created = repo
        .create(fields(json!({"name": "Pikachu", "level": 5})))
        .unwrap();

    let stored = repo
        .update(&created.id.to_string(), fields(json!({"name": "Raichu"})))
        .unwrap();
    assert_eq!(stored.to_value(), json!({"name": "Raichu"}));

    let loaded = repo.get(created.id).unwrap();
    assert_eq!(loaded.to_value(), json!({"name": "Raichu"}));
    assert!(loaded.created_at().is_none());
}

#[test]
fn update_can_preserve_created_at() {
    let options = RepositoryOptions {
        update_mode: UpdateMode::PreserveCreatedAt,
        ..RepositoryOptions::default()
    };
    let repo = KvRecordRepository::with_options(MemoryKvStore::new(), options);
    let created = repo.create(fields(json!({"name": "Pikachu"}))).unwrap();
    let created_at = created.record.created_at().unwrap().to_string();

    repo.update(
        "1",
        fields(json!({"name": "Raichu", "createdAt": "2000-01-01T00:00:00.000Z"})),
    )
    .unwrap();

    let loaded = repo.get(created.id).unwrap();
    assert_eq!(loaded.get("name"), Some(&json!("Raichu")));
    assert_eq!(loaded.created_at(), Some(created_at.as_str()));
    assert!(loaded.get("id").is_none());
}

#[test]
fn update_rejects_malformed_id() {
    let repo = KvRecordRepository::new(MemoryKvStore::new());
    repo.create(fields(json!({"name": "Pikachu"}))).unwrap();

    for raw in ["abc", "1.5", "0", "-1", ""] {
        let err = repo.update(raw, fields(json!({"name": "x"}))).unwrap_err();
        assert!(
            matches!(&err, RepoError::InvalidId(value) if value == raw),
            "{raw:?} gave {err}"
        );
    }
}

#[test]
fn update_missing_returns_not_found_without_writing() {
    let store = MemoryKvStore::new();
    let repo = KvRecordRepository::new(&store);

    let err = repo.update("99999", fields(json!({"name": "Missingno"}))).unwrap_err();
    assert!(matches!(err, RepoError::NotFound(id) if id.get() == 99999));
    assert!(store.is_empty().unwrap());
}

#[test]
fn delete_removes_record_and_ids_are_not_reused() {
    let repo = KvRecordRepository::new(MemoryKvStore::new());
    let first = repo.create(fields(json!({"name": "Pidgey"}))).unwrap();

    repo.delete(first.id).unwrap();
    assert!(matches!(repo.get(first.id), Err(RepoError::NotFound(_))));
    assert!(matches!(repo.delete(first.id), Err(RepoError::NotFound(_))));

    let second = repo.create(fields(json!({"name": "Pidgeotto"}))).unwrap();
    assert_eq!(second.id.get(), 2);
}

#[test]
fn delete_missing_has_no_side_effects() {
    let store = MemoryKvStore::new();
    let repo = KvRecordRepository::new(&store);
    let kept = repo.create(fields(json!({"name": "Snorlax"}))).unwrap();

    let err = repo.delete(RecordId::new(7).unwrap()).unwrap_err();
    assert!(matches!(err, RepoError::NotFound(id) if id.get() == 7));
    assert_eq!(repo.get(kept.id).unwrap(), kept.record);
    assert_eq!(store.len().unwrap(), 2);
}

#[test]
fn stored_key_matches_record_id() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteKvStore::try_new(&conn).unwrap();
    let repo = KvRecordRepository::new(&store);

    let created = repo.create(fields(json!({"name": "Eevee"}))).unwrap();
    let entries = store
        .list(&pokedex_core::KvKey::root().with(COLLECTION))
        .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].key,
        pokedex_core::KvKey::root().with(COLLECTION).with(created.id.get())
    );
}

#[test]
fn walkthrough_on_memory_store() {
    walkthrough(&KvRecordRepository::new(MemoryKvStore::new()));
}

#[test]
fn walkthrough_on_sqlite_store() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteKvStore::try_new(&conn).unwrap();
    walkthrough(&KvRecordRepository::new(store));
}

fn walkthrough(repo: &impl RecordRepository) {
    let pikachu = repo.create(fields(json!({"name": "Pikachu"}))).unwrap();
    assert_eq!(pikachu.id.get(), 1);
    assert_eq!(pikachu.record.get("name"), Some(&json!("Pikachu")));

    let bulbasaur = repo.create(fields(json!({"name": "Bulbasaur"}))).unwrap();
    assert_eq!(bulbasaur.id.get(), 2);

    let initial_names = names(repo);
    assert_eq!(initial_names, HashSet::from(["Pikachu".to_string(), "Bulbasaur".to_string()]));

    repo.update("1", fields(json!({"name": "Raichu"}))).unwrap();
    assert_eq!(
        repo.get(pikachu.id).unwrap().to_value(),
        json!({"name": "Raichu"})
    );

    repo.delete(bulbasaur.id).unwrap();
    assert!(matches!(
        repo.get(bulbasaur.id),
        Err(RepoError::NotFound(id)) if id == bulbasaur.id
    ));

    assert_eq!(names(repo), HashSet::from(["Raichu".to_string()]));
}

fn names(repo: &impl RecordRepository) -> HashSet<String> {
    repo.list()
        .unwrap()
        .into_iter()
        .map(|record| record.get("name").and_then(Value::as_str).unwrap().to_string())
        .collect()
}

fn fields(value: Value) -> Fields {
    match value {
        Value::Object(fields) => fields,
        other => panic!("fixture must be an object, got {other}"),
    }
}
