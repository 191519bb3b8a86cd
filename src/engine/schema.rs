//! Schema registry
//!
//! Per-table cache of known column names, filled by a one-row probe the first
//! time a table is addressed. Entries live until the owning database is
//! closed; only columns the engine adds itself are recorded afterwards.

use std::collections::HashMap;
use std::sync::RwLock;

use super::error::{Result, StoreError};
use super::logging::SharedLog;

const COMPONENT: &str = "schema";

pub struct SchemaRegistry {
    tables: RwLock<HashMap<String, Vec<String>>>,
    log: SharedLog,
}

impl SchemaRegistry {
    pub fn new(log: SharedLog) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            log,
        }
    }

    pub fn columns(&self, table: &str) -> Option<Vec<String>> {
        self.tables.read().ok()?.get(table).cloned()
    }

    pub fn is_known(&self, table: &str) -> bool {
        self.columns(table).is_some()
    }

    /// Make sure `table` is registered, probing it when it is not.
    ///
    /// A failed probe is logged as a schema probe failure and leaves the
    /// table unregistered; the caller carries on with `None`.
    pub fn ensure<P>(&self, table: &str, probe: P) -> Option<Vec<String>>
    where
        P: FnOnce(&str) -> Result<Vec<String>>,
    {
        if let Some(columns) = self.columns(table) {
            return Some(columns);
        }

        match probe(table) {
            Ok(columns) => {
                self.log.debug(
                    COMPONENT,
                    &format!("{} has columns [{}]", table, columns.join(", ")),
                );
                if let Ok(mut tables) = self.tables.write() {
                    tables.insert(table.to_string(), columns.clone());
                }
                Some(columns)
            }
            Err(e) => {
                let failure = StoreError::SchemaProbe {
                    table: table.to_string(),
                    reason: e.to_string(),
                };
                self.log.warn(COMPONENT, &failure.to_string());
                None
            }
        }
    }

    /// Record a column the engine added itself
    pub fn add_field(&self, table: &str, column: &str) {
        if let Ok(mut tables) = self.tables.write() {
            let columns = tables.entry(table.to_string()).or_default();
            if !columns.iter().any(|c| c == column) {
                columns.push(column.to_string());
            }
        }
    }

    /// Drop every cached table, e.g. when the database is closed
    pub fn clear(&self) {
        if let Ok(mut tables) = self.tables.write() {
            tables.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::logging::{LogLevel, MemorySink};
    use std::cell::Cell;

    #[test]
    fn test_probe_runs_once() {
        let registry = SchemaRegistry::new(MemorySink::new());
        let probes = Cell::new(0);
        let probe = |_: &str| {
            probes.set(probes.get() + 1);
            Ok(vec!["id".to_string(), "name".to_string()])
        };

        assert_eq!(registry.ensure("profiles", probe).unwrap().len(), 2);
        assert_eq!(registry.ensure("profiles", probe).unwrap().len(), 2);
        assert_eq!(probes.get(), 1);
    }

    #[test]
    fn test_failed_probe_is_not_cached() {
        let sink = MemorySink::new();
        let registry = SchemaRegistry::new(sink.clone());

        let columns = registry.ensure("missing", |_| Err(StoreError::Read("no such table".to_string())));
        assert!(columns.is_none());
        assert!(!registry.is_known("missing"));
        assert_eq!(sink.count(LogLevel::Warn), 1);
        assert!(sink.contains("Schema probe failed for missing"));
    }

    #[test]
    fn test_add_field() {
        let registry = SchemaRegistry::new(MemorySink::new());
        registry.ensure("t", |_| Ok(vec!["id".to_string()]));
        registry.add_field("t", "extra");
        registry.add_field("t", "extra");
        assert_eq!(registry.columns("t").unwrap(), vec!["id".to_string(), "extra".to_string()]);
    }

    #[test]
    fn test_clear_forces_new_probe() {
        let registry = SchemaRegistry::new(MemorySink::new());
        registry.ensure("t", |_| Ok(vec!["id".to_string(), "test".to_string()]));
        registry.clear();
        assert!(!registry.is_known("t"));

        let columns = registry.ensure("t", |_| Ok(vec!["id".to_string()])).unwrap();
        assert_eq!(columns, vec!["id".to_string()]);
    }
}
