//! SQLite connection plumbing: pool setup, row conversion and catalog queries

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

use crate::engine::error::{Result, StoreError};
use crate::engine::record::{Record, Scalar};

use super::statement;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// File-backed pool with WAL journaling
pub fn open_pool(db_path: &Path) -> Result<DbPool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(db_path)
        .with_init(|conn| conn.busy_timeout(Duration::from_secs(5)));
    let pool = Pool::builder()
        .max_size(10)
        .build(manager)
        .map_err(|e| StoreError::Open(e.to_string()))?;

    let conn = pool.get()?;
    let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    Ok(pool)
}

/// Single-connection in-memory pool. The connection is never recycled, since
/// dropping it drops the database.
pub fn memory_pool() -> Result<DbPool> {
    let manager = SqliteConnectionManager::memory();
    Pool::builder()
        .max_size(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .build(manager)
        .map_err(|e| StoreError::Open(e.to_string()))
}

pub fn user_version(conn: &Connection) -> Result<u32> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version.max(0) as u32)
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&statement::table_exists(name))?;
    Ok(stmt.exists([])?)
}

/// Column names of `table`, from a one-row probe
pub fn probe_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let stmt = conn.prepare(&statement::probe(table))?;
    Ok(stmt.column_names().iter().map(|s| s.to_string()).collect())
}

fn value_ref_to_scalar(val: ValueRef<'_>) -> Scalar {
    match val {
        ValueRef::Null => Scalar::Null,
        ValueRef::Integer(i) => Scalar::Integer(i),
        ValueRef::Real(f) => Scalar::Real(f),
        ValueRef::Text(t) => Scalar::Text(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => Scalar::Text(format!("BLOB({} bytes)", b.len())),
    }
}

/// Run a query and convert every row. NULL columns are left out of the
/// record, so columns added for other rows do not show up as empty fields.
pub fn query_records(conn: &Connection, sql: &str) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(sql)?;
    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    let rows = stmt.query_map([], |row| {
        let mut record = Record::new();
        for (i, name) in column_names.iter().enumerate() {
            let value = value_ref_to_scalar(row.get_ref(i)?);
            if !value.is_null() {
                record.set(name, value);
            }
        }
        Ok(record)
    })?;

    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_pool_keeps_data() {
        let pool = memory_pool().unwrap();
        pool.get()
            .unwrap()
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT); INSERT INTO t (name) VALUES ('a')")
            .unwrap();

        let conn = pool.get().unwrap();
        assert!(table_exists(&conn, "t").unwrap());
        assert!(!table_exists(&conn, "nope").unwrap());
        assert_eq!(probe_columns(&conn, "t").unwrap(), vec!["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn test_query_records_skips_nulls() {
        let pool = memory_pool().unwrap();
        let conn = pool.get().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, avg REAL);
             INSERT INTO t (name, avg) VALUES ('it''s', 1.5);
             INSERT INTO t (name) VALUES ('b');",
        )
        .unwrap();

        let records = query_records(&conn, "SELECT * FROM t ORDER BY id").unwrap();
        assert_eq!(records[0].get("name"), Some(&Scalar::from("it's")));
        assert_eq!(records[0].get("avg"), Some(&Scalar::Real(1.5)));
        assert!(!records[1].contains("avg"));
    }

    #[test]
    fn test_user_version() {
        let pool = memory_pool().unwrap();
        let conn = pool.get().unwrap();
        assert_eq!(user_version(&conn).unwrap(), 0);
        conn.execute_batch("PRAGMA user_version = 4").unwrap();
        assert_eq!(user_version(&conn).unwrap(), 4);
    }
}
