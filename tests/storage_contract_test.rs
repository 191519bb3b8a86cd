use callprof::engine::config::{BackendPreference, StorageConfig, StoreConfig};
use callprof::engine::contract::{CursorAction, Direction, IterationOptions, StoreContract};
use callprof::engine::document::{DocFactory, DocFeatures, DocumentHost};
use callprof::engine::logging::{LogLevel, MemorySink};
use callprof::engine::negotiator::negotiate;
use callprof::engine::record::{Key, Record, Scalar};
use callprof::engine::relational::{sqlite, SqliteHost};
use callprof::engine::selector::{select_backend, Environment, Storage};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn idb_config(version: u32) -> StoreConfig {
    StoreConfig::new("IDB", "Store", version, "id", true)
}

async fn open(root: &Path, preference: BackendPreference, version: u32) -> Storage {
    let env = Environment::probe(&StorageConfig::at(root));
    let storage = select_backend(&env, preference, MemorySink::new()).unwrap();
    storage.open_db(idb_config(version)).await.unwrap();
    storage
}

async fn put_get_remove(preference: BackendPreference) {
    let dir = tempfile::tempdir().unwrap();
    let storage = open(dir.path(), preference, 1).await;

    let key = storage.put(Record::new().with("test", "data")).await.unwrap();
    let record = storage.get(key.clone()).await.unwrap().unwrap();
    assert_eq!(record.get("test"), Some(&Scalar::from("data")));
    assert_eq!(record.key("id"), Some(key.clone()));

    storage.remove(key.clone()).await.unwrap();
    assert!(storage.get(key.clone()).await.unwrap().is_none());

    // Removing twice is not an error
    storage.remove(key).await.unwrap();
}

#[tokio::test]
async fn test_document_put_get_remove() {
    put_get_remove(BackendPreference::Document).await;
}

#[tokio::test]
async fn test_relational_put_get_remove() {
    put_get_remove(BackendPreference::Relational).await;
}

async fn get_all_then_clear(preference: BackendPreference) {
    let dir = tempfile::tempdir().unwrap();
    let storage = open(dir.path(), preference, 1).await;

    storage.put(Record::new().with("test", "one")).await.unwrap();
    storage.put(Record::new().with("test", "two")).await.unwrap();
    assert_eq!(storage.get_all().await.unwrap().len(), 2);

    storage.clear().await.unwrap();
    assert!(storage.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_document_get_all_then_clear() {
    get_all_then_clear(BackendPreference::Document).await;
}

#[tokio::test]
async fn test_relational_get_all_then_clear() {
    get_all_then_clear(BackendPreference::Relational).await;
}

async fn iterate_visits_each_record(preference: BackendPreference) {
    let dir = tempfile::tempdir().unwrap();
    let storage = open(dir.path(), preference, 1).await;
    for i in 0..3 {
        storage.put(Record::new().with("n", i)).await.unwrap();
    }

    // End signalled through visit(None) after every record
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    storage
        .iterate(
            move |record: Option<&Record>| {
                sink.lock().unwrap().push(record.and_then(|r| r.get("n").cloned()));
            },
            IterationOptions::new().order(Direction::Desc),
        )
        .await
        .unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            Some(Scalar::Integer(2)),
            Some(Scalar::Integer(1)),
            Some(Scalar::Integer(0)),
            None
        ]
    );

    // With on_end the visitor only sees records
    let visits = Arc::new(AtomicUsize::new(0));
    let ended_after = Arc::new(AtomicUsize::new(usize::MAX));
    let counter = visits.clone();
    let (count_at_end, end) = (visits.clone(), ended_after.clone());
    storage
        .iterate(
            move |record: Option<&Record>| {
                assert!(record.is_some());
                counter.fetch_add(1, Ordering::SeqCst);
            },
            IterationOptions::new().on_end(move || end.store(count_at_end.load(Ordering::SeqCst), Ordering::SeqCst)),
        )
        .await
        .unwrap();
    assert_eq!(visits.load(Ordering::SeqCst), 3);
    assert_eq!(ended_after.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_document_iterate_visits_each_record() {
    iterate_visits_each_record(BackendPreference::Document).await;
}

#[tokio::test]
async fn test_relational_iterate_visits_each_record() {
    iterate_visits_each_record(BackendPreference::Relational).await;
}

async fn cursor_delete_needs_write_access(preference: BackendPreference) {
    let dir = tempfile::tempdir().unwrap();
    let storage = open(dir.path(), preference, 1).await;
    storage.put(Record::new().with("n", 1)).await.unwrap();
    storage.put(Record::new().with("n", 2)).await.unwrap();

    let read_only = storage
        .iterate(|_: Option<&Record>| CursorAction::Delete, IterationOptions::new())
        .await;
    assert!(read_only.is_err());

    storage
        .iterate(
            |record: Option<&Record>| match record.and_then(|r| r.get("n")) {
                Some(Scalar::Integer(1)) => CursorAction::Delete,
                _ => CursorAction::Continue,
            },
            IterationOptions::new().write_access(true),
        )
        .await
        .unwrap();

    let left = storage.get_all().await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].get("n"), Some(&Scalar::Integer(2)));
}

#[tokio::test]
async fn test_document_cursor_delete_needs_write_access() {
    cursor_delete_needs_write_access(BackendPreference::Document).await;
}

#[tokio::test]
async fn test_relational_cursor_delete_needs_write_access() {
    cursor_delete_needs_write_access(BackendPreference::Relational).await;
}

async fn equal_numeric_keys_replace(preference: BackendPreference) {
    let dir = tempfile::tempdir().unwrap();
    let storage = open(dir.path(), preference, 1).await;

    storage.put(Record::new().with("id", 2).with("v", "int")).await.unwrap();
    storage.put(Record::new().with("id", 2.0).with("v", "real")).await.unwrap();

    let all = storage.get_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].get("v"), Some(&Scalar::from("real")));
    let record = storage.get(Key::Integer(2)).await.unwrap().unwrap();
    assert_eq!(record.get("v"), Some(&Scalar::from("real")));
}

#[tokio::test]
async fn test_document_equal_numeric_keys_replace() {
    equal_numeric_keys_replace(BackendPreference::Document).await;
}

#[tokio::test]
async fn test_relational_equal_numeric_keys_replace() {
    equal_numeric_keys_replace(BackendPreference::Relational).await;
}

#[tokio::test]
async fn test_relational_escaped_strings_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let storage = open(dir.path(), BackendPreference::Relational, 1).await;

    let tricky = "it's a \"quoted\" '' value; DROP TABLE Store; --";
    let key = storage.put(Record::new().with("test", tricky)).await.unwrap();
    let record = storage.get(key).await.unwrap().unwrap();
    assert_eq!(record.get("test").and_then(|v| v.as_str()), Some(tricky));

    let engine = storage.as_relational().unwrap();
    assert!(engine.table_exists("Store").await.unwrap());
}

#[tokio::test]
async fn test_document_newer_store_is_adopted() {
    let dir = tempfile::tempdir().unwrap();
    let factory = DocFactory::new(dir.path(), DocFeatures::default());

    let sink = MemorySink::new();
    let host = DocumentHost::new(factory.clone(), idb_config(2));
    let created = negotiate(host, 2, sink.clone()).await.unwrap();
    assert_eq!(created.version, 2);
    created.handle.close();

    let host = DocumentHost::new(factory, idb_config(1));
    let negotiated = negotiate(host, 1, sink.clone()).await.unwrap();
    assert_eq!(negotiated.attempts, 2);
    assert_eq!(negotiated.version, 2);
    assert_eq!(sink.count(LogLevel::Error), 0);
}

#[tokio::test]
async fn test_relational_newer_store_is_adopted() {
    let dir = tempfile::tempdir().unwrap();
    let storage = open(dir.path(), BackendPreference::Relational, 2).await;
    storage.close();

    let engine = callprof::engine::relational::RelationalStoreEngine::new(
        &dir.path().join("relational"),
        false,
        MemorySink::new(),
    );
    let path = engine.db_path("IDB").unwrap();
    let pool = sqlite::open_pool(&path).unwrap();
    let negotiated = negotiate(SqliteHost::new(pool, idb_config(1)), 1, MemorySink::new())
        .await
        .unwrap();
    assert_eq!(negotiated.attempts, 2);
    assert_eq!(negotiated.version, 2);

    engine.open_db(idb_config(1)).await.unwrap();
    assert_eq!(engine.version(), Some(2));
    assert!(engine.get(Key::Integer(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_forced_backend_without_api_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = StorageConfig::at(dir.path());
    settings.document.enabled = false;
    let env = Environment::probe(&settings);

    let sink = MemorySink::new();
    assert!(select_backend(&env, BackendPreference::Document, sink.clone()).is_err());
    assert_eq!(sink.count(LogLevel::Error), 1);

    let storage = select_backend(&env, BackendPreference::Auto, sink).unwrap();
    assert!(storage.as_relational().is_some());
}
