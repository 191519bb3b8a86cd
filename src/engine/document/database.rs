//! Document database API
//!
//! A file-backed object store database: each database is a directory holding
//! `_meta.json` (version + catalog) and one sub-directory per object store
//! with one JSON file per record. Structure changes only happen inside a
//! [`VersionChange`]; data access goes through a scoped [`Transaction`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::engine::contract::KeyRange;
use crate::engine::record::{Key, Record};

use super::cursor::{CursorDirection, DocCursor};
use super::error::{DocError, Result};
use super::meta::{DbMeta, IndexMeta, StoreMeta};

/// How the database version is set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionApi {
    /// `open(name, version)` raises the version and grants an upgrade
    OnOpen,
    /// `open(name)` ignores versions; `set_version` is a separate step
    Explicit,
}

/// Capabilities of this document API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocFeatures {
    pub versioning: VersionApi,
    pub auto_increment: bool,
    pub bulk_get_all: bool,
}

impl Default for DocFeatures {
    fn default() -> Self {
        Self {
            versioning: VersionApi::OnOpen,
            auto_increment: true,
            bulk_get_all: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

/// Entry point: opens databases under a root directory
#[derive(Debug, Clone)]
pub struct DocFactory {
    root: PathBuf,
    features: DocFeatures,
}

/// Outcome of a versioned open request
pub enum OpenOutcome {
    Success(DocDatabase),
    UpgradeNeeded(VersionChange),
}

impl DocFactory {
    pub fn new(root: &Path, features: DocFeatures) -> Self {
        Self {
            root: root.to_path_buf(),
            features,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn features(&self) -> DocFeatures {
        self.features
    }

    /// Open `name` at `version`.
    ///
    /// Fails with [`DocError::VersionError`] when the stored version is
    /// higher; returns an upgrade when the database is absent or older.
    pub fn open(&self, name: &str, version: u32, description: &str) -> Result<OpenOutcome> {
        if self.features.versioning != VersionApi::OnOpen {
            return Err(DocError::Unsupported("versioned open"));
        }
        if version == 0 {
            return Err(DocError::InvalidVersion(version));
        }

        let path = self.root.join(name);
        let meta = DbMeta::load(&path)?.unwrap_or_else(|| DbMeta::new(description));
        let stored = meta.version;

        if version < stored {
            return Err(DocError::VersionError {
                requested: version,
                current: stored,
            });
        }

        let db = DocDatabase::from_meta(name, path, self.features, meta);
        if version > stored {
            Ok(OpenOutcome::UpgradeNeeded(VersionChange::begin(db, stored, version)?))
        } else {
            Ok(OpenOutcome::Success(db))
        }
    }

    /// Open `name` at whatever version is stored, creating it at version 0
    pub fn open_unversioned(&self, name: &str, description: &str) -> Result<DocDatabase> {
        let path = self.root.join(name);
        let meta = match DbMeta::load(&path)? {
            Some(meta) => meta,
            None => {
                let meta = DbMeta::new(description);
                meta.save(&path)?;
                meta
            }
        };
        Ok(DocDatabase::from_meta(name, path, self.features, meta))
    }

    pub fn delete_database(&self, name: &str) -> Result<()> {
        let path = self.root.join(name);
        if path.exists() {
            fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    pub fn database_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        if !self.root.exists() {
            return Ok(names);
        }
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_dir() && path.join(super::meta::META_FILE).exists() {
                if let Some(name) = path.file_name() {
                    names.push(name.to_string_lossy().to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

struct DbState {
    meta: DbMeta,
    closed: bool,
}

struct DbInner {
    name: String,
    path: PathBuf,
    features: DocFeatures,
    state: Mutex<DbState>,
}

/// An open database connection. Clones share the same connection.
#[derive(Clone)]
pub struct DocDatabase {
    inner: Arc<DbInner>,
}

impl std::fmt::Debug for DocDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocDatabase")
            .field("name", &self.inner.name)
            .field("version", &self.version())
            .finish()
    }
}

impl DocDatabase {
    fn from_meta(name: &str, path: PathBuf, features: DocFeatures, meta: DbMeta) -> Self {
        Self {
            inner: Arc::new(DbInner {
                name: name.to_string(),
                path,
                features,
                state: Mutex::new(DbState { meta, closed: false }),
            }),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, DbState>> {
        self.inner
            .state
            .lock()
            .map_err(|_| DocError::Io(std::io::Error::other("database state lock poisoned")))
    }

    fn open_state(&self) -> Result<MutexGuard<'_, DbState>> {
        let state = self.state()?;
        if state.closed {
            return Err(DocError::Closed);
        }
        Ok(state)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn features(&self) -> DocFeatures {
        self.inner.features
    }

    pub fn version(&self) -> u32 {
        self.state().map(|s| s.meta.version).unwrap_or(0)
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.state()
            .map(|s| s.meta.stores.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, store: &str) -> bool {
        self.state()
            .map(|s| s.meta.stores.contains_key(store))
            .unwrap_or(false)
    }

    pub fn index_names(&self, store: &str) -> Result<Vec<String>> {
        let state = self.open_state()?;
        Ok(state.meta.store(store)?.indexes.keys().cloned().collect())
    }

    pub fn key_path(&self, store: &str) -> Result<String> {
        let state = self.open_state()?;
        Ok(state.meta.store(store)?.key_path.clone())
    }

    pub fn is_auto_increment(&self, store: &str) -> Result<bool> {
        let state = self.open_state()?;
        Ok(state.meta.store(store)?.auto_increment)
    }

    pub fn is_closed(&self) -> bool {
        self.state().map(|s| s.closed).unwrap_or(true)
    }

    pub fn close(&self) {
        if let Ok(mut state) = self.state() {
            state.closed = true;
        }
    }

    /// Start a transaction scoped to `stores`
    pub fn transaction(&self, stores: &[&str], mode: TxMode) -> Result<Transaction> {
        let state = self.open_state()?;
        for store in stores {
            state.meta.store(store)?;
        }
        Ok(Transaction {
            db: self.clone(),
            scope: stores.iter().map(|s| s.to_string()).collect(),
            mode,
        })
    }

    /// Explicit version step for the [`VersionApi::Explicit`] API
    pub fn set_version(&self, version: u32) -> Result<VersionChange> {
        if self.inner.features.versioning != VersionApi::Explicit {
            return Err(DocError::Unsupported("set_version"));
        }
        let stored = self.open_state()?.meta.version;
        if version < stored {
            return Err(DocError::VersionError {
                requested: version,
                current: stored,
            });
        }
        VersionChange::begin(self.clone(), stored, version)
    }

    fn store_dir(&self, store: &str) -> PathBuf {
        self.inner.path.join(store)
    }

    fn record_path(&self, store: &str, key: &Key) -> PathBuf {
        self.store_dir(store).join(format!("{}.json", encode_key(key)))
    }

    pub(crate) fn put_record(&self, store: &str, mut record: Record) -> Result<Key> {
        let mut state = self.open_state()?;
        let features = self.inner.features;
        let meta = state.meta.store(store)?.clone();

        let key = match record.key(&meta.key_path) {
            Some(key) => key,
            None if meta.auto_increment && features.auto_increment => {
                let key = Key::Integer(meta.next_key);
                record.set(&meta.key_path, key.clone());
                key
            }
            None => return Err(DocError::MissingKey(meta.key_path.clone())),
        };

        for (index_name, index) in meta.indexes.iter().filter(|(_, i)| i.unique) {
            if let Some(value) = record.get(&index.field).and_then(Key::from_scalar) {
                for other in self.list_keys_locked(store)? {
                    if other == key {
                        continue;
                    }
                    let existing = self.read_record_locked(store, &other)?;
                    if existing.and_then(|r| r.key(&index.field)).as_ref() == Some(&value) {
                        return Err(DocError::Constraint {
                            index: index_name.clone(),
                            value: value.to_string(),
                        });
                    }
                }
            }
        }

        fs::create_dir_all(self.store_dir(store))?;
        let content = serde_json::to_string_pretty(&record)?;
        fs::write(self.record_path(store, &key), content)?;

        if meta.auto_increment {
            if let Some(n) = key.as_integer() {
                if n >= meta.next_key {
                    let store_meta = state.meta.store_mut(store)?;
                    store_meta.next_key = n + 1;
                    state.meta.touch();
                    state.meta.save(&self.inner.path)?;
                }
            }
        }

        Ok(key)
    }

    pub(crate) fn read_record(&self, store: &str, key: &Key) -> Result<Option<Record>> {
        let state = self.open_state()?;
        state.meta.store(store)?;
        self.read_record_locked(store, key)
    }

    fn read_record_locked(&self, store: &str, key: &Key) -> Result<Option<Record>> {
        let path = self.record_path(store, key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub(crate) fn delete_record(&self, store: &str, key: &Key) -> Result<()> {
        let state = self.open_state()?;
        state.meta.store(store)?;
        let path = self.record_path(store, key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub(crate) fn clear_store(&self, store: &str) -> Result<()> {
        let state = self.open_state()?;
        state.meta.store(store)?;
        for key in self.list_keys_locked(store)? {
            fs::remove_file(self.record_path(store, &key))?;
        }
        Ok(())
    }

    pub(crate) fn list_keys(&self, store: &str) -> Result<Vec<Key>> {
        let state = self.open_state()?;
        state.meta.store(store)?;
        self.list_keys_locked(store)
    }

    /// All record keys of `store`, sorted
    fn list_keys_locked(&self, store: &str) -> Result<Vec<Key>> {
        let dir = self.store_dir(store);
        let mut keys = Vec::new();
        if !dir.exists() {
            return Ok(keys);
        }

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Some(stem) = path.file_stem() {
                    keys.push(decode_key(&stem.to_string_lossy())?);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    /// `(index key, primary key)` pairs for an index, sorted by both.
    /// Records without a valid value for the indexed field are left out.
    pub(crate) fn index_entries(&self, store: &str, index: &str) -> Result<Vec<(Key, Key)>> {
        let state = self.open_state()?;
        let field = state
            .meta
            .store(store)?
            .indexes
            .get(index)
            .ok_or_else(|| DocError::IndexNotFound(index.to_string()))?
            .field
            .clone();

        let mut entries = Vec::new();
        for key in self.list_keys_locked(store)? {
            if let Some(value) = self.read_record_locked(store, &key)?.and_then(|r| r.key(&field)) {
                entries.push((value, key));
            }
        }
        entries.sort();
        Ok(entries)
    }
}

/// A transaction scoped to a set of object stores.
///
/// Each request is applied as it completes; ending the transaction early
/// with [`Transaction::abort`] only releases it.
pub struct Transaction {
    db: DocDatabase,
    scope: Vec<String>,
    mode: TxMode,
}

impl Transaction {
    pub fn mode(&self) -> TxMode {
        self.mode
    }

    pub fn object_store(&self, name: &str) -> Result<ObjectStore<'_>> {
        if !self.scope.iter().any(|s| s == name) {
            return Err(DocError::OutOfScope(name.to_string()));
        }
        Ok(ObjectStore {
            tx: self,
            name: name.to_string(),
        })
    }

    pub fn abort(self) {}
}

/// Data access to one object store inside a transaction
pub struct ObjectStore<'t> {
    tx: &'t Transaction,
    name: String,
}

impl ObjectStore<'_> {
    fn writable(&self) -> Result<()> {
        match self.tx.mode {
            TxMode::ReadWrite => Ok(()),
            TxMode::ReadOnly => Err(DocError::ReadOnly),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert or replace; returns the record key
    pub fn put(&self, record: Record) -> Result<Key> {
        self.writable()?;
        self.tx.db.put_record(&self.name, record)
    }

    pub fn get(&self, key: &Key) -> Result<Option<Record>> {
        self.tx.db.read_record(&self.name, key)
    }

    pub fn delete(&self, key: &Key) -> Result<()> {
        self.writable()?;
        self.tx.db.delete_record(&self.name, key)
    }

    pub fn clear(&self) -> Result<()> {
        self.writable()?;
        self.tx.db.clear_store(&self.name)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.tx.db.list_keys(&self.name)?.len())
    }

    /// Bulk read of every record in key order
    pub fn get_all(&self) -> Result<Vec<Record>> {
        if !self.tx.db.features().bulk_get_all {
            return Err(DocError::Unsupported("get_all"));
        }
        let keys = self.tx.db.list_keys(&self.name)?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.tx.db.read_record(&self.name, &key)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub fn index_names(&self) -> Result<Vec<String>> {
        self.tx.db.index_names(&self.name)
    }

    /// Cursor over the primary keys
    pub fn open_cursor(&self, range: Option<&KeyRange>, direction: CursorDirection) -> Result<DocCursor> {
        let entries = self
            .tx
            .db
            .list_keys(&self.name)?
            .into_iter()
            .map(|k| (k.clone(), k))
            .collect();
        Ok(DocCursor::new(
            self.tx.db.clone(),
            &self.name,
            self.tx.mode == TxMode::ReadWrite,
            entries,
            range,
            direction,
        ))
    }

    /// Cursor over a secondary index
    pub fn open_index_cursor(
        &self,
        index: &str,
        range: Option<&KeyRange>,
        direction: CursorDirection,
    ) -> Result<DocCursor> {
        let entries = self.tx.db.index_entries(&self.name, index)?;
        Ok(DocCursor::new(
            self.tx.db.clone(),
            &self.name,
            self.tx.mode == TxMode::ReadWrite,
            entries,
            range,
            direction,
        ))
    }
}

/// Exclusive mutation phase: the only place structure may change
pub struct VersionChange {
    db: DocDatabase,
    old_version: u32,
    new_version: u32,
    working: DbMeta,
    dropped: Vec<String>,
}

impl VersionChange {
    fn begin(db: DocDatabase, old_version: u32, new_version: u32) -> Result<Self> {
        let working = db.state()?.meta.clone();
        Ok(Self {
            db,
            old_version,
            new_version,
            working,
            dropped: Vec::new(),
        })
    }

    pub fn old_version(&self) -> u32 {
        self.old_version
    }

    pub fn new_version(&self) -> u32 {
        self.new_version
    }

    pub fn contains(&self, store: &str) -> bool {
        self.working.stores.contains_key(store)
    }

    pub fn has_index(&self, store: &str, index: &str) -> bool {
        self.working
            .stores
            .get(store)
            .map(|s| s.indexes.contains_key(index))
            .unwrap_or(false)
    }

    pub fn create_object_store(&mut self, name: &str, key_path: &str, auto_increment: bool) -> Result<()> {
        if self.contains(name) {
            return Err(DocError::StoreAlreadyExists(name.to_string()));
        }
        self.working
            .stores
            .insert(name.to_string(), StoreMeta::new(key_path, auto_increment));
        self.dropped.retain(|d| d != name);
        Ok(())
    }

    pub fn delete_object_store(&mut self, name: &str) -> Result<()> {
        if self.working.stores.remove(name).is_none() {
            return Err(DocError::StoreNotFound(name.to_string()));
        }
        self.dropped.push(name.to_string());
        Ok(())
    }

    pub fn create_index(&mut self, store: &str, name: &str, field: &str, unique: bool) -> Result<()> {
        if self.has_index(store, name) {
            return Err(DocError::IndexAlreadyExists(name.to_string()));
        }

        if unique && !self.dropped.iter().any(|d| d == store) {
            let mut seen = BTreeMap::new();
            for key in self.db.list_keys_locked(store)? {
                if let Some(value) = self.db.read_record_locked(store, &key)?.and_then(|r| r.key(field)) {
                    if seen.insert(value.clone(), key).is_some() {
                        return Err(DocError::Constraint {
                            index: name.to_string(),
                            value: value.to_string(),
                        });
                    }
                }
            }
        }

        self.working.store_mut(store)?.indexes.insert(
            name.to_string(),
            IndexMeta {
                field: field.to_string(),
                unique,
            },
        );
        Ok(())
    }

    pub fn delete_index(&mut self, store: &str, name: &str) -> Result<()> {
        if self.working.store_mut(store)?.indexes.remove(name).is_none() {
            return Err(DocError::IndexNotFound(name.to_string()));
        }
        Ok(())
    }

    /// Persist the new structure and version; returns the open connection
    pub fn commit(mut self) -> Result<DocDatabase> {
        let path = self.db.inner.path.clone();
        self.working.version = self.new_version;
        self.working.touch();

        for store in &self.dropped {
            let dir = path.join(store);
            if dir.exists() {
                fs::remove_dir_all(dir)?;
            }
        }
        for store in self.working.stores.keys() {
            fs::create_dir_all(path.join(store))?;
        }
        self.working.save(&path)?;

        {
            let mut state = self.db.state()?;
            state.meta = self.working;
            state.closed = false;
        }
        Ok(self.db)
    }

    /// Drop the pending changes; returns the connection at its old version
    pub fn abort(self) -> DocDatabase {
        self.db
    }
}

/// Record file stem for a key: type tag + printable payload. Integral reals
/// share the integer stem so equal keys address one file.
fn encode_key(key: &Key) -> String {
    if let Some(i) = key.as_integer() {
        return format!("i{}", i);
    }
    match key {
        Key::Integer(i) => format!("i{}", i),
        Key::Real(f) => format!("r{}", hex::encode(f.to_bits().to_be_bytes())),
        Key::Text(s) => format!("s{}", hex::encode(s.as_bytes())),
    }
}

fn decode_key(stem: &str) -> Result<Key> {
    let corrupt = || DocError::CorruptKey(stem.to_string());
    let (tag, payload) = stem.split_at(stem.char_indices().nth(1).map(|(i, _)| i).unwrap_or(stem.len()));
    match tag {
        "i" => payload.parse::<i64>().map(Key::Integer).map_err(|_| corrupt()),
        "r" => {
            let bytes: [u8; 8] = hex::decode(payload)
                .map_err(|_| corrupt())?
                .try_into()
                .map_err(|_| corrupt())?;
            Ok(Key::Real(f64::from_bits(u64::from_be_bytes(bytes))))
        }
        "s" => {
            let bytes = hex::decode(payload).map_err(|_| corrupt())?;
            String::from_utf8(bytes).map(Key::Text).map_err(|_| corrupt())
        }
        _ => Err(corrupt()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_store(factory: &DocFactory, name: &str, version: u32) -> DocDatabase {
        match factory.open(name, version, "").unwrap() {
            OpenOutcome::UpgradeNeeded(mut change) => {
                change.create_object_store("Store", "id", true).unwrap();
                change.commit().unwrap()
            }
            OpenOutcome::Success(_) => panic!("expected upgrade"),
        }
    }

    #[test]
    fn test_key_file_names() {
        for key in [Key::Integer(-42), Key::Real(1.5), Key::Text("it's/odd".into())] {
            let stem = encode_key(&key);
            assert!(!stem.contains('/'));
            assert_eq!(decode_key(&stem).unwrap(), key);
        }
        assert!(decode_key("x12").is_err());
    }

    #[test]
    fn test_integral_real_shares_integer_file() {
        assert_eq!(encode_key(&Key::Real(2.0)), encode_key(&Key::Integer(2)));
        assert_eq!(encode_key(&Key::Real(-0.0)), "i0");
        assert_ne!(encode_key(&Key::Real(2.5)), encode_key(&Key::Integer(2)));
        assert!(encode_key(&Key::Real(f64::INFINITY)).starts_with('r'));
        assert!(encode_key(&Key::Real(1e19)).starts_with('r'));
    }

    #[test]
    fn test_versioned_open() {
        let dir = tempdir().unwrap();
        let factory = DocFactory::new(dir.path(), DocFeatures::default());

        let db = create_store(&factory, "IDB", 2);
        assert_eq!(db.version(), 2);
        assert!(db.contains("Store"));

        assert!(matches!(
            factory.open("IDB", 1, ""),
            Err(DocError::VersionError { requested: 1, current: 2 })
        ));
        assert!(matches!(factory.open("IDB", 2, ""), Ok(OpenOutcome::Success(_))));
        assert_eq!(factory.database_names().unwrap(), vec!["IDB".to_string()]);
    }

    #[test]
    fn test_auto_increment_and_scope() {
        let dir = tempdir().unwrap();
        let factory = DocFactory::new(dir.path(), DocFeatures::default());
        let db = create_store(&factory, "IDB", 1);

        let tx = db.transaction(&["Store"], TxMode::ReadWrite).unwrap();
        let store = tx.object_store("Store").unwrap();
        let first = store.put(Record::new().with("test", "data")).unwrap();
        let second = store.put(Record::new().with("more", "data")).unwrap();
        assert_eq!(first, Key::Integer(1));
        assert_eq!(second, Key::Integer(2));
        assert_eq!(store.get(&first).unwrap().unwrap().get("id"), Some(&1.into()));

        assert!(matches!(tx.object_store("Other"), Err(DocError::OutOfScope(_))));

        let read = db.transaction(&["Store"], TxMode::ReadOnly).unwrap();
        assert!(matches!(
            read.object_store("Store").unwrap().clear(),
            Err(DocError::ReadOnly)
        ));
    }

    #[test]
    fn test_unique_index_constraint() {
        let dir = tempdir().unwrap();
        let factory = DocFactory::new(dir.path(), DocFeatures::default());
        let db = create_store(&factory, "IDB", 1);
        db.close();

        let db = match factory.open("IDB", 2, "").unwrap() {
            OpenOutcome::UpgradeNeeded(mut change) => {
                change.create_index("Store", "by_name", "name", true).unwrap();
                change.commit().unwrap()
            }
            OpenOutcome::Success(_) => panic!("expected upgrade"),
        };

        let tx = db.transaction(&["Store"], TxMode::ReadWrite).unwrap();
        let store = tx.object_store("Store").unwrap();
        store.put(Record::new().with("name", "render")).unwrap();
        assert!(matches!(
            store.put(Record::new().with("name", "render")),
            Err(DocError::Constraint { .. })
        ));
    }

    #[test]
    fn test_closed_connection_rejects_transactions() {
        let dir = tempdir().unwrap();
        let factory = DocFactory::new(dir.path(), DocFeatures::default());
        let db = create_store(&factory, "IDB", 1);
        db.close();
        assert!(matches!(
            db.transaction(&["Store"], TxMode::ReadOnly),
            Err(DocError::Closed)
        ));
    }
}
