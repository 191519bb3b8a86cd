//! Document Store Engine
//!
//! Implements StoreContract over the file-backed document database.

use std::sync::RwLock;

use crate::engine::config::{IndexSpec, StoreConfig};
use crate::engine::contract::{
    boxed_visitor, finish_walk, run_blocking, CursorAction, IterationOptions, StoreContract,
};
use crate::engine::error::{Result, StoreError};
use crate::engine::logging::SharedLog;
use crate::engine::negotiator::{negotiate, ContainerHost};
use crate::engine::record::{Key, Record};

use super::cursor::CursorDirection;
use super::database::{DocDatabase, DocFactory, TxMode, VersionChange};
use super::error::DocError;
use super::host::DocumentHost;

const COMPONENT: &str = "document";

#[derive(Clone)]
struct DocState {
    db: DocDatabase,
    config: StoreConfig,
}

pub struct DocumentStoreEngine {
    factory: DocFactory,
    state: RwLock<Option<DocState>>,
    log: SharedLog,
}

impl DocumentStoreEngine {
    pub fn new(factory: DocFactory, log: SharedLog) -> Self {
        Self {
            factory,
            state: RwLock::new(None),
            log,
        }
    }

    pub fn factory(&self) -> &DocFactory {
        &self.factory
    }

    /// Negotiated version, `None` before `open_db`
    pub fn version(&self) -> Option<u32> {
        self.current().ok().map(|s| s.db.version())
    }

    fn current(&self) -> Result<DocState> {
        self.state
            .read()
            .map_err(|_| StoreError::Task("engine state lock poisoned".to_string()))?
            .clone()
            .ok_or(StoreError::NotOpen)
    }

    fn replace(&self, next: Option<DocState>) {
        if let Ok(mut state) = self.state.write() {
            if let Some(old) = state.take() {
                old.db.close();
            }
            *state = next;
        }
    }

    /// Log a failed operation with its category before handing it back
    fn report<T>(&self, operation: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.log.error(
                COMPONENT,
                &format!("{} failed ({}): {}", operation, e.category(), e),
            );
        }
        result
    }

    /// Run one structure change in its own mutation phase (version + 1)
    async fn mutate<F>(&self, operation: &'static str, apply: F) -> Result<DocDatabase>
    where
        F: FnOnce(&mut VersionChange, &str) -> std::result::Result<(), DocError> + Send + 'static,
    {
        let state = self.current()?;
        let host = DocumentHost::new(self.factory.clone(), state.config.clone());
        let store = state.config.store_name.clone();

        let (db, outcome) = run_blocking(move || {
            let next = state.db.version() + 1;
            let mut change = host.enter_mutation(state.db, next)?;
            match apply(&mut change, &store) {
                Ok(()) => Ok((host.commit(change)?, Ok(()))),
                Err(e) => Ok((change.abort(), Err(StoreError::Index(e.to_string())))),
            }
        })
        .await
        .map_err(|e| {
            // The connection was given up to the mutation; nothing is usable now.
            self.replace(None);
            e
        })?;

        if let Ok(mut guard) = self.state.write() {
            if let Some(current) = guard.as_mut() {
                current.db = db.clone();
            }
        }
        self.log.debug(COMPONENT, &format!("{} at version {}", operation, db.version()));
        outcome.map(|_| db)
    }

    pub async fn create_index(&self, index: IndexSpec) -> Result<()> {
        let result = self
            .mutate("create_index", move |change, store| {
                change.create_index(store, &index.name, &index.field, index.unique)
            })
            .await
            .map(|_| ());
        self.report("create_index", result)
    }

    pub async fn remove_index(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        let result = self
            .mutate("remove_index", move |change, store| change.delete_index(store, &name))
            .await
            .map(|_| ());
        self.report("remove_index", result)
    }

    pub async fn has_index(&self, name: &str) -> Result<bool> {
        Ok(self.index_names().await?.iter().any(|n| n == name))
    }

    pub async fn index_names(&self) -> Result<Vec<String>> {
        let result = self.current().and_then(|state| {
            state
                .db
                .index_names(&state.config.store_name)
                .map_err(|e| StoreError::Index(e.to_string()))
        });
        self.report("index_names", result)
    }

    /// Drop the whole object store. The engine is closed afterwards; a new
    /// `open_db` recreates the store.
    pub async fn delete_object_store(&self) -> Result<()> {
        let result = self
            .mutate("delete_object_store", |change, store| change.delete_object_store(store))
            .await;
        if result.is_ok() {
            self.replace(None);
        }
        self.report("delete_object_store", result.map(|_| ()))
    }

    /// Key to write under when the record has none and no generator applies
    fn synthesize_key(&self, state: &DocState, record: &mut Record) {
        let key_path = &state.config.key_path;
        let generated = self.factory.features().auto_increment && state.config.auto_increment;
        if record.key(key_path).is_none() && !generated {
            record.set(key_path, Key::from_timestamp());
        }
    }
}

impl StoreContract for DocumentStoreEngine {
    async fn open_db(&self, config: StoreConfig) -> Result<()> {
        if let Err(e) = config.validate() {
            return self.report("open_db", Err(StoreError::Open(e.to_string())));
        }

        self.replace(None);
        let host = DocumentHost::new(self.factory.clone(), config.clone());
        let negotiated = negotiate(host, config.version, self.log.clone()).await?;

        self.log.info(
            COMPONENT,
            &format!(
                "{}.{} ready at version {}",
                config.name, config.store_name, negotiated.version
            ),
        );
        self.replace(Some(DocState {
            db: negotiated.handle,
            config,
        }));
        Ok(())
    }

    async fn put(&self, record: Record) -> Result<Key> {
        let result = async {
            let state = self.current()?;
            let mut record = record;
            self.synthesize_key(&state, &mut record);

            run_blocking(move || {
                let store = state.config.store_name.as_str();
                let tx = state.db.transaction(&[store], TxMode::ReadWrite)?;
                let key = tx.object_store(store)?.put(record)?;
                Ok(key)
            })
            .await
            .map_err(|e| match e {
                StoreError::Document(d) => StoreError::Write(d.to_string()),
                other => other,
            })
        }
        .await;
        self.report("put", result)
    }

    async fn get(&self, key: Key) -> Result<Option<Record>> {
        let result = async {
            let state = self.current()?;
            run_blocking(move || {
                let store = state.config.store_name.as_str();
                let tx = state.db.transaction(&[store], TxMode::ReadOnly)?;
                let record = tx.object_store(store)?.get(&key)?;
                Ok(record)
            })
            .await
            .map_err(|e| match e {
                StoreError::Document(d) => StoreError::Read(d.to_string()),
                other => other,
            })
        }
        .await;
        self.report("get", result)
    }

    async fn remove(&self, key: Key) -> Result<()> {
        let result = async {
            let state = self.current()?;
            run_blocking(move || {
                let store = state.config.store_name.as_str();
                let tx = state.db.transaction(&[store], TxMode::ReadWrite)?;
                tx.object_store(store)?.delete(&key)?;
                Ok(())
            })
            .await
            .map_err(|e| match e {
                StoreError::Document(d) => StoreError::Remove(d.to_string()),
                other => other,
            })
        }
        .await;
        self.report("remove", result)
    }

    async fn get_all(&self) -> Result<Vec<Record>> {
        let result = async {
            let state = self.current()?;
            let bulk = self.factory.features().bulk_get_all;
            run_blocking(move || {
                let store = state.config.store_name.as_str();
                let tx = state.db.transaction(&[store], TxMode::ReadOnly)?;
                let object_store = tx.object_store(store)?;
                if bulk {
                    return Ok(object_store.get_all()?);
                }

                let mut cursor = object_store.open_cursor(None, CursorDirection::Next)?;
                let mut records = Vec::new();
                while let Some(entry) = cursor.advance()? {
                    records.push(entry.value);
                }
                Ok(records)
            })
            .await
            .map_err(|e| match e {
                StoreError::Document(d) => StoreError::Read(d.to_string()),
                other => other,
            })
        }
        .await;
        self.report("get_all", result)
    }

    async fn clear(&self) -> Result<()> {
        let result = async {
            let state = self.current()?;
            run_blocking(move || {
                let store = state.config.store_name.as_str();
                let tx = state.db.transaction(&[store], TxMode::ReadWrite)?;
                tx.object_store(store)?.clear()?;
                Ok(())
            })
            .await
            .map_err(|e| match e {
                StoreError::Document(d) => StoreError::Clear(d.to_string()),
                other => other,
            })
        }
        .await;
        self.report("clear", result)
    }

    async fn iterate<F, R>(&self, visit: F, options: IterationOptions) -> Result<()>
    where
        F: FnMut(Option<&Record>) -> R + Send + 'static,
        R: Into<CursorAction>,
    {
        let result = async {
            let state = self.current()?;
            let mut visitor = boxed_visitor(visit);

            run_blocking(move || {
                let IterationOptions {
                    index,
                    order,
                    filter_duplicates,
                    key_range,
                    write_access,
                    on_end,
                } = options;
                let mode = if write_access { TxMode::ReadWrite } else { TxMode::ReadOnly };
                let direction = CursorDirection::from_options(order, filter_duplicates);

                let store = state.config.store_name.as_str();
                let tx = state.db.transaction(&[store], mode)?;
                let object_store = tx.object_store(store)?;
                let mut cursor = match &index {
                    Some(name) => object_store.open_index_cursor(name, key_range.as_ref(), direction),
                    None => object_store.open_cursor(key_range.as_ref(), direction),
                }
                .map_err(|e| StoreError::Cursor(e.to_string()))?;

                while let Some(entry) = cursor.advance()? {
                    match visitor(Some(&entry.value)) {
                        CursorAction::Continue => {}
                        CursorAction::Update(record) => {
                            if !write_access {
                                return Err(StoreError::ReadOnly);
                            }
                            cursor.update(record).map_err(|e| StoreError::Write(e.to_string()))?;
                        }
                        CursorAction::Delete => {
                            if !write_access {
                                return Err(StoreError::ReadOnly);
                            }
                            cursor.delete().map_err(|e| StoreError::Remove(e.to_string()))?;
                        }
                    }
                }

                finish_walk(&mut visitor, on_end);
                Ok(())
            })
            .await
            .map_err(|e| match e {
                StoreError::Document(d) => StoreError::Cursor(d.to_string()),
                other => other,
            })
        }
        .await;
        self.report("iterate", result)
    }

    fn close(&self) {
        self.replace(None);
    }
}
