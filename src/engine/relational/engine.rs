//! Relational Store Engine
//!
//! Implements StoreContract over SQLite with generated statement text, plus
//! the table-level helpers the profiling controller uses.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::engine::config::StoreConfig;
use crate::engine::contract::{
    boxed_visitor, finish_walk, run_blocking, CursorAction, IterationOptions, StoreContract,
};
use crate::engine::error::{Result, StoreError};
use crate::engine::logging::SharedLog;
use crate::engine::negotiator::negotiate;
use crate::engine::record::{Key, Record};
use crate::engine::schema::SchemaRegistry;

use super::host::SqliteHost;
use super::sqlite::{self, DbConn, DbPool};
use super::statement::{self, CursorQuery, TableSchema, WhereClause};

const COMPONENT: &str = "relational";

#[derive(Clone)]
struct SqlState {
    pool: DbPool,
    config: StoreConfig,
    version: u32,
}

impl SqlState {
    fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }
}

pub struct RelationalStoreEngine {
    root: PathBuf,
    in_memory: bool,
    state: RwLock<Option<SqlState>>,
    current_table: RwLock<Option<String>>,
    schema: Arc<SchemaRegistry>,
    log: SharedLog,
}

impl RelationalStoreEngine {
    pub fn new(root: &Path, in_memory: bool, log: SharedLog) -> Self {
        Self {
            root: root.to_path_buf(),
            in_memory,
            state: RwLock::new(None),
            current_table: RwLock::new(None),
            schema: Arc::new(SchemaRegistry::new(log.clone())),
            log,
        }
    }

    /// Database file for a store name; `None` for in-memory engines
    pub fn db_path(&self, name: &str) -> Option<PathBuf> {
        if self.in_memory {
            None
        } else {
            Some(self.root.join(format!("{}.sqlite", name)))
        }
    }

    pub fn version(&self) -> Option<u32> {
        self.current().ok().map(|s| s.version)
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    fn current(&self) -> Result<SqlState> {
        self.state
            .read()
            .map_err(|_| StoreError::Task("engine state lock poisoned".to_string()))?
            .clone()
            .ok_or(StoreError::NotOpen)
    }

    /// Table addressed by the next operation: the one picked with
    /// [`set_table`](Self::set_table), or the store container
    fn table(&self, state: &SqlState) -> String {
        self.current_table
            .read()
            .ok()
            .and_then(|t| t.clone())
            .unwrap_or_else(|| state.config.store_name.clone())
    }

    fn report<T>(&self, operation: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.log.error(
                COMPONENT,
                &format!("{} failed ({}): {}", operation, e.category(), e),
            );
        }
        result
    }

    /// Address a different table from now on. Its columns are probed the
    /// first time an operation touches it.
    pub fn set_table(&self, name: &str) -> &Self {
        if let Ok(mut table) = self.current_table.write() {
            *table = Some(name.to_string());
        }
        self
    }

    pub async fn create_table(&self, schema: TableSchema) -> Result<()> {
        let result = async {
            let state = self.current()?;
            run_blocking(move || {
                state
                    .conn()?
                    .execute_batch(&statement::create_table(&schema))
                    .map_err(|e| StoreError::Write(e.to_string()))
            })
            .await
        }
        .await;
        self.report("create_table", result)
    }

    pub async fn table_exists(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        let result = async {
            let state = self.current()?;
            run_blocking(move || {
                let conn = state.conn()?;
                sqlite::table_exists(&conn, &name)
            })
            .await
        }
        .await;
        self.report("table_exists", result)
    }

    pub async fn record_exists(&self, fields: &[&str], filter: WhereClause) -> Result<bool> {
        Ok(!self.select(fields, filter).await?.is_empty())
    }

    /// Rows of the current table matching `filter`; no fields selects all
    pub async fn select(&self, fields: &[&str], filter: WhereClause) -> Result<Vec<Record>> {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let result = async {
            let state = self.current()?;
            let table = self.table(&state);
            let schema = self.schema.clone();
            run_blocking(move || {
                let conn = state.conn()?;
                schema.ensure(&table, |t| sqlite::probe_columns(&conn, t));
                let fields: Vec<&str> = fields.iter().map(|f| f.as_str()).collect();
                sqlite::query_records(&conn, &statement::select(&table, &fields, &filter))
                    .map_err(|e| StoreError::Read(e.to_string()))
            })
            .await
        }
        .await;
        self.report("select", result)
    }
}

/// Add the record's unknown fields as columns, then upsert it
fn write_record(conn: &DbConn, schema: &SchemaRegistry, table: &str, record: &Record) -> Result<()> {
    let columns = schema
        .ensure(table, |t| sqlite::probe_columns(conn, t))
        .unwrap_or_default();

    for field in record.fields() {
        if !columns.contains(field) {
            conn.execute_batch(&statement::add_column(table, field))
                .map_err(|e| StoreError::Write(e.to_string()))?;
            schema.add_field(table, field);
        }
    }

    conn.execute_batch(&statement::insert_or_replace(table, record))
        .map_err(|e| StoreError::Write(e.to_string()))
}

impl StoreContract for RelationalStoreEngine {
    async fn open_db(&self, config: StoreConfig) -> Result<()> {
        if let Err(e) = config.validate() {
            return self.report("open_db", Err(StoreError::Open(e.to_string())));
        }
        self.close();

        let pool = {
            let path = self.db_path(&config.name);
            let result = run_blocking(move || match path {
                Some(path) => sqlite::open_pool(&path),
                None => sqlite::memory_pool(),
            })
            .await;
            self.report("open_db", result)?
        };
        let host = SqliteHost::new(pool.clone(), config.clone());
        let negotiated = negotiate(host, config.version, self.log.clone()).await?;

        self.log.info(
            COMPONENT,
            &format!(
                "{}.{} ready at version {}",
                config.name, config.store_name, negotiated.version
            ),
        );
        if let Ok(mut state) = self.state.write() {
            *state = Some(SqlState {
                pool,
                config,
                version: negotiated.version,
            });
        }
        Ok(())
    }

    async fn put(&self, record: Record) -> Result<Key> {
        let result = async {
            let state = self.current()?;
            let table = self.table(&state);
            let schema = self.schema.clone();
            let key_path = state.config.key_path.clone();

            let mut record = record;
            if record.key(&key_path).is_none() && !state.config.auto_increment {
                record.set(&key_path, Key::from_timestamp());
            }

            run_blocking(move || {
                let conn = state.conn()?;
                write_record(&conn, &schema, &table, &record)?;
                Ok(record
                    .key(&key_path)
                    .unwrap_or_else(|| Key::Integer(conn.last_insert_rowid())))
            })
            .await
        }
        .await;
        self.report("put", result)
    }

    async fn get(&self, key: Key) -> Result<Option<Record>> {
        let result = async {
            let state = self.current()?;
            let table = self.table(&state);
            let schema = self.schema.clone();
            run_blocking(move || {
                let conn = state.conn()?;
                schema.ensure(&table, |t| sqlite::probe_columns(&conn, t));
                let filter = WhereClause::key(&state.config.key_path, &key);
                let mut rows = sqlite::query_records(&conn, &statement::select(&table, &[], &filter))
                    .map_err(|e| StoreError::Read(e.to_string()))?;
                Ok(if rows.is_empty() { None } else { Some(rows.remove(0)) })
            })
            .await
        }
        .await;
        self.report("get", result)
    }

    async fn remove(&self, key: Key) -> Result<()> {
        let result = async {
            let state = self.current()?;
            let table = self.table(&state);
            run_blocking(move || {
                let filter = WhereClause::key(&state.config.key_path, &key);
                state
                    .conn()?
                    .execute_batch(&statement::delete(&table, &filter))
                    .map_err(|e| StoreError::Remove(e.to_string()))
            })
            .await
        }
        .await;
        self.report("remove", result)
    }

    async fn get_all(&self) -> Result<Vec<Record>> {
        let result = async {
            let state = self.current()?;
            let table = self.table(&state);
            run_blocking(move || {
                let query = CursorQuery {
                    table: &table,
                    key_path: &state.config.key_path,
                    ..CursorQuery::default()
                };
                let conn = state.conn()?;
                sqlite::query_records(&conn, &query.to_sql())
                    .map_err(|e| StoreError::Read(e.to_string()))
            })
            .await
        }
        .await;
        self.report("get_all", result)
    }

    async fn clear(&self) -> Result<()> {
        let result = async {
            let state = self.current()?;
            let table = self.table(&state);
            run_blocking(move || {
                state
                    .conn()?
                    .execute_batch(&statement::delete(&table, &WhereClause::new()))
                    .map_err(|e| StoreError::Clear(e.to_string()))
            })
            .await
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
            let table = self.table(&state);
            let schema = self.schema.clone();
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
                let key_path = state.config.key_path.as_str();

                // Declared indexes are addressed by name; anything else is a column.
                let column = index.as_deref().map(|name| {
                    state
                        .config
                        .indexes
                        .iter()
                        .find(|i| i.name == name)
                        .map(|i| i.field.as_str())
                        .unwrap_or(name)
                });
                let query = CursorQuery {
                    table: &table,
                    key_path,
                    index: column,
                    order,
                    unique: filter_duplicates,
                    range: key_range.as_ref(),
                };

                let conn = state.conn()?;
                let rows = sqlite::query_records(&conn, &query.to_sql())
                    .map_err(|e| StoreError::Cursor(e.to_string()))?;

                for row in rows {
                    match visitor(Some(&row)) {
                        CursorAction::Continue => {}
                        CursorAction::Update(mut record) => {
                            if !write_access {
                                return Err(StoreError::ReadOnly);
                            }
                            if let Some(key) = row.key(key_path) {
                                record.set(key_path, key);
                            }
                            write_record(&conn, &schema, &table, &record)?;
                        }
                        CursorAction::Delete => {
                            if !write_access {
                                return Err(StoreError::ReadOnly);
                            }
                            if let Some(key) = row.key(key_path) {
                                conn.execute_batch(&statement::delete(&table, &WhereClause::key(key_path, &key)))
                                    .map_err(|e| StoreError::Remove(e.to_string()))?;
                            }
                        }
                    }
                }

                finish_walk(&mut visitor, on_end);
                Ok(())
            })
            .await
        }
        .await;
        self.report("iterate", result)
    }

    fn close(&self) {
        if let Ok(mut state) = self.state.write() {
            *state = None;
        }
        if let Ok(mut table) = self.current_table.write() {
            *table = None;
        }
        self.schema.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::contract::Direction;
    use crate::engine::logging::MemorySink;
    use crate::engine::record::Scalar;
    use std::sync::Mutex;
    use tempfile::tempdir;

    async fn opened(config: StoreConfig) -> (tempfile::TempDir, RelationalStoreEngine) {
        let dir = tempdir().unwrap();
        let engine = RelationalStoreEngine::new(dir.path(), false, MemorySink::new());
        engine.open_db(config).await.unwrap();
        (dir, engine)
    }

    fn config() -> StoreConfig {
        StoreConfig::new("IDB", "Store", 1, "id", true)
    }

    #[tokio::test]
    async fn test_put_adds_columns_and_round_trips_quotes() {
        let (_dir, engine) = opened(config()).await;

        let key = engine
            .put(Record::new().with("test", "bbc's 'quoted' data"))
            .await
            .unwrap();
        assert_eq!(key, Key::Integer(1));

        let record = engine.get(key).await.unwrap().unwrap();
        assert_eq!(record.get("test"), Some(&Scalar::from("bbc's 'quoted' data")));
        assert!(engine.schema().columns("Store").unwrap().contains(&"test".to_string()));
    }

    #[tokio::test]
    async fn test_timestamp_key_without_auto_increment() {
        let (_dir, engine) = opened(StoreConfig::new("IDB", "Store", 1, "id", false)).await;
        let before = chrono::Utc::now().timestamp_millis();

        let key = engine.put(Record::new().with("n", 1)).await.unwrap();
        match key {
            Key::Integer(ms) => assert!(ms >= before),
            other => panic!("unexpected key {:?}", other),
        }
        assert!(engine.get(key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_profile_table_helpers() {
        let (_dir, engine) = opened(config()).await;
        engine
            .create_table(TableSchema::new(
                "profiles",
                &["id INTEGER PRIMARY KEY", "name VARCHAR(100)", "avg MEDIUMINT(6)"],
            ))
            .await
            .unwrap();
        assert!(engine.table_exists("profiles").await.unwrap());
        assert!(!engine.table_exists("nope").await.unwrap());

        engine.set_table("profiles");
        engine.put(Record::new().with("name", "render").with("avg", 3)).await.unwrap();
        engine.put(Record::new().with("name", "layout").with("avg", 5)).await.unwrap();

        let rows = engine.select(&[], WhereClause::new().eq("name", "render")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(engine
            .record_exists(&["id"], WhereClause::new().eq("name", "layout"))
            .await
            .unwrap());
        assert!(!engine
            .record_exists(&["id"], WhereClause::new().eq("name", "paint"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_iterate_desc_with_update() {
        let (_dir, engine) = opened(config()).await;
        for n in 1..=3 {
            engine.put(Record::new().with("n", n)).await.unwrap();
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        engine
            .iterate(
                move |record: Option<&Record>| match record {
                    Some(r) => {
                        s.lock().unwrap().push(r.get("n").cloned().unwrap());
                        CursorAction::Update(Record::new().with("n", 0))
                    }
                    None => CursorAction::Continue,
                },
                IterationOptions::new().order(Direction::Desc).write_access(true),
            )
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Scalar::from(3), Scalar::from(2), Scalar::from(1)]);
        let all = engine.get_all().await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|r| r.get("n") == Some(&Scalar::from(0))));
    }

    #[tokio::test]
    async fn test_reopen_other_database_probes_columns_again() {
        let dir = tempdir().unwrap();
        let engine = RelationalStoreEngine::new(dir.path(), false, MemorySink::new());

        engine.open_db(StoreConfig::new("first", "Store", 1, "id", true)).await.unwrap();
        engine.put(Record::new().with("test", "a")).await.unwrap();
        assert!(engine.schema().is_known("Store"));

        engine.open_db(StoreConfig::new("second", "Store", 1, "id", true)).await.unwrap();
        assert!(!engine.schema().is_known("Store"));
        let key = engine.put(Record::new().with("test", "b")).await.unwrap();
        let record = engine.get(key).await.unwrap().unwrap();
        assert_eq!(record.get("test"), Some(&Scalar::from("b")));
        assert!(engine.table_exists("Store").await.unwrap());
        assert_eq!(engine.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unopened_engine() {
        let dir = tempdir().unwrap();
        let engine = RelationalStoreEngine::new(dir.path(), true, MemorySink::new());
        assert!(matches!(engine.put(Record::new()).await, Err(StoreError::NotOpen)));
    }
}
