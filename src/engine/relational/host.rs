//! Negotiation host for the relational backend
//!
//! The database version lives in `PRAGMA user_version`. A mutation phase is
//! a connection holding `BEGIN IMMEDIATE`, so no other writer can interleave
//! with the structure change.

use crate::engine::config::StoreConfig;
use crate::engine::error::{Result, StoreError};
use crate::engine::negotiator::{ContainerHost, Opened};

use super::sqlite::{self, DbConn, DbPool};
use super::statement::{self, TableSchema};

#[derive(Clone)]
pub struct SqliteHost {
    pool: DbPool,
    config: StoreConfig,
}

/// The database at a negotiated version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlHandle {
    pub version: u32,
}

/// An open `BEGIN IMMEDIATE` transaction. Rolled back when dropped uncommitted.
pub struct SqlMutation {
    conn: Option<DbConn>,
    version: u32,
}

impl SqlMutation {
    fn conn(&self) -> Result<&DbConn> {
        self.conn
            .as_ref()
            .ok_or_else(|| StoreError::Blocked("mutation already finished".to_string()))
    }
}

impl Drop for SqlMutation {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.execute_batch("ROLLBACK").ok();
        }
    }
}

impl SqliteHost {
    pub fn new(pool: DbPool, config: StoreConfig) -> Self {
        Self { pool, config }
    }

    fn begin(&self, conn: DbConn, version: u32) -> Result<SqlMutation> {
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| StoreError::Blocked(e.to_string()))?;
        Ok(SqlMutation {
            conn: Some(conn),
            version,
        })
    }

    fn container_schema(&self) -> TableSchema {
        let mut fields = vec![statement::primary_key_column(
            &self.config.key_path,
            self.config.auto_increment,
        )];
        for index in &self.config.indexes {
            if index.field != self.config.key_path {
                fields.push(statement::quote_ident(&index.field));
            }
        }
        TableSchema {
            name: self.config.store_name.clone(),
            fields,
        }
    }
}

impl ContainerHost for SqliteHost {
    type Handle = SqlHandle;
    type Mutation = SqlMutation;

    fn open(&self, version: u32) -> Result<Opened<SqlHandle, SqlMutation>> {
        let conn = self.pool.get()?;
        let stored = sqlite::user_version(&conn)?;

        if version < stored {
            return Err(StoreError::VersionConflict {
                requested: version,
                current: stored,
            });
        }
        if version > stored {
            return Ok(Opened::UpgradeNeeded(self.begin(conn, version)?));
        }
        Ok(Opened::Ready(SqlHandle { version }))
    }

    fn version(&self, handle: &SqlHandle) -> u32 {
        handle.version
    }

    fn has_container(&self, _handle: &SqlHandle) -> Result<bool> {
        let conn = self.pool.get()?;
        sqlite::table_exists(&conn, &self.config.store_name)
    }

    fn confirm(&self, _handle: &SqlHandle) -> Result<()> {
        let conn = self.pool.get()?;
        sqlite::probe_columns(&conn, &self.config.store_name)
            .map(|_| ())
            .map_err(|e| StoreError::Open(e.to_string()))
    }

    fn enter_mutation(&self, _handle: SqlHandle, version: u32) -> Result<SqlMutation> {
        let conn = self.pool.get()?;
        let stored = sqlite::user_version(&conn)?;
        if version < stored {
            return Err(StoreError::VersionConflict {
                requested: version,
                current: stored,
            });
        }
        self.begin(conn, version)
    }

    fn prepare(&self, mutation: &mut SqlMutation) -> Result<()> {
        let conn = mutation.conn()?;
        let table = &self.config.store_name;

        conn.execute_batch(&statement::create_table(&self.container_schema()))
            .map_err(|e| StoreError::Open(e.to_string()))?;

        let columns = sqlite::probe_columns(conn, table)?;
        for index in &self.config.indexes {
            if !columns.contains(&index.field) {
                conn.execute_batch(&statement::add_column(table, &index.field))
                    .map_err(|e| StoreError::Index(e.to_string()))?;
            }
            conn.execute_batch(&statement::create_index(table, &index.name, &index.field, index.unique))
                .map_err(|e| StoreError::Index(e.to_string()))?;
        }
        Ok(())
    }

    fn commit(&self, mut mutation: SqlMutation) -> Result<SqlHandle> {
        let version = mutation.version;
        let conn = mutation.conn()?;
        conn.execute_batch(&format!("PRAGMA user_version = {}; COMMIT", version))
            .map_err(|e| StoreError::Open(e.to_string()))?;
        // Committed: nothing left for Drop to roll back.
        mutation.conn.take();
        Ok(SqlHandle { version })
    }
}
