//! Backend selection
//!
//! Probes which storage APIs are usable and hands out exactly one engine
//! behind the [`Storage`] facade. The choice is fixed at construction.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use super::config::{BackendPreference, StorageConfig, StoreConfig};
use super::contract::{CursorAction, IterationOptions, StoreContract};
use super::document::{DocFactory, DocFeatures, DocumentStoreEngine, VersionApi};
use super::error::{Result, StoreError};
use super::logging::SharedLog;
use super::record::{Key, Record};
use super::relational::RelationalStoreEngine;

const COMPONENT: &str = "selector";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Document,
    Relational,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Document => write!(f, "document"),
            BackendKind::Relational => write!(f, "relational"),
        }
    }
}

/// Which storage APIs the current environment offers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Environment {
    pub document: bool,
    pub relational: bool,
    pub root: PathBuf,
    #[serde(skip)]
    pub features: DocFeatures,
    pub in_memory: bool,
}

impl Environment {
    pub fn probe(storage: &StorageConfig) -> Self {
        Self {
            document: storage.document.enabled && root_is_writable(&document_root(&storage.root)),
            relational: storage.relational.enabled && rusqlite::Connection::open_in_memory().is_ok(),
            root: storage.root.clone(),
            features: DocFeatures {
                versioning: if storage.document.legacy_versioning {
                    VersionApi::Explicit
                } else {
                    VersionApi::OnOpen
                },
                auto_increment: storage.document.auto_increment,
                bulk_get_all: storage.document.bulk_get_all,
            },
            in_memory: storage.relational.in_memory,
        }
    }

    pub fn available(&self) -> Vec<BackendKind> {
        let mut kinds = Vec::new();
        if self.document {
            kinds.push(BackendKind::Document);
        }
        if self.relational {
            kinds.push(BackendKind::Relational);
        }
        kinds
    }
}

fn document_root(root: &Path) -> PathBuf {
    root.join("document")
}

fn relational_root(root: &Path) -> PathBuf {
    root.join("relational")
}

fn root_is_writable(path: &Path) -> bool {
    std::fs::create_dir_all(path).is_ok()
        && std::fs::metadata(path)
            .map(|m| m.is_dir() && !m.permissions().readonly())
            .unwrap_or(false)
}

/// Pick the engine for `env`: the document backend when present, the
/// relational one otherwise. A forced preference only accepts its backend.
pub fn select_backend(env: &Environment, preference: BackendPreference, log: SharedLog) -> Result<Storage> {
    let kind = match preference {
        BackendPreference::Auto if env.document => BackendKind::Document,
        BackendPreference::Auto if env.relational => BackendKind::Relational,
        BackendPreference::Document if env.document => BackendKind::Document,
        BackendPreference::Relational if env.relational => BackendKind::Relational,
        _ => {
            log.error(
                COMPONENT,
                &format!("no usable backend for preference {:?} in {:?}", preference, env.available()),
            );
            return Err(StoreError::NoBackend);
        }
    };

    log.info(COMPONENT, &format!("using the {} backend", kind));
    Ok(match kind {
        BackendKind::Document => Storage::Document(DocumentStoreEngine::new(
            DocFactory::new(&document_root(&env.root), env.features),
            log,
        )),
        BackendKind::Relational => Storage::Relational(RelationalStoreEngine::new(
            &relational_root(&env.root),
            env.in_memory,
            log,
        )),
    })
}

/// The single engine handed to callers
pub enum Storage {
    Document(DocumentStoreEngine),
    Relational(RelationalStoreEngine),
}

impl Storage {
    pub fn kind(&self) -> BackendKind {
        match self {
            Storage::Document(_) => BackendKind::Document,
            Storage::Relational(_) => BackendKind::Relational,
        }
    }

    pub fn version(&self) -> Option<u32> {
        match self {
            Storage::Document(e) => e.version(),
            Storage::Relational(e) => e.version(),
        }
    }

    pub fn as_document(&self) -> Option<&DocumentStoreEngine> {
        match self {
            Storage::Document(e) => Some(e),
            Storage::Relational(_) => None,
        }
    }

    pub fn as_relational(&self) -> Option<&RelationalStoreEngine> {
        match self {
            Storage::Relational(e) => Some(e),
            Storage::Document(_) => None,
        }
    }
}

impl StoreContract for Storage {
    async fn open_db(&self, config: StoreConfig) -> Result<()> {
        match self {
            Storage::Document(e) => e.open_db(config).await,
            Storage::Relational(e) => e.open_db(config).await,
        }
    }

    async fn put(&self, record: Record) -> Result<Key> {
        match self {
            Storage::Document(e) => e.put(record).await,
            Storage::Relational(e) => e.put(record).await,
        }
    }

    async fn get(&self, key: Key) -> Result<Option<Record>> {
        match self {
            Storage::Document(e) => e.get(key).await,
            Storage::Relational(e) => e.get(key).await,
        }
    }

    async fn remove(&self, key: Key) -> Result<()> {
        match self {
            Storage::Document(e) => e.remove(key).await,
            Storage::Relational(e) => e.remove(key).await,
        }
    }

    async fn get_all(&self) -> Result<Vec<Record>> {
        match self {
            Storage::Document(e) => e.get_all().await,
            Storage::Relational(e) => e.get_all().await,
        }
    }

    async fn clear(&self) -> Result<()> {
        match self {
            Storage::Document(e) => e.clear().await,
            Storage::Relational(e) => e.clear().await,
        }
    }

    async fn iterate<F, R>(&self, visit: F, options: IterationOptions) -> Result<()>
    where
        F: FnMut(Option<&Record>) -> R + Send + 'static,
        R: Into<CursorAction>,
    {
        match self {
            Storage::Document(e) => e.iterate(visit, options).await,
            Storage::Relational(e) => e.iterate(visit, options).await,
        }
    }

    fn close(&self) {
        match self {
            Storage::Document(e) => e.close(),
            Storage::Relational(e) => e.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::logging::MemorySink;
    use tempfile::tempdir;

    #[test]
    fn test_prefers_document_backend() {
        let dir = tempdir().unwrap();
        let env = Environment::probe(&StorageConfig::at(dir.path()));
        assert_eq!(env.available(), vec![BackendKind::Document, BackendKind::Relational]);

        let storage = select_backend(&env, BackendPreference::Auto, MemorySink::new()).unwrap();
        assert_eq!(storage.kind(), BackendKind::Document);
        assert!(storage.as_relational().is_none());
    }

    #[test]
    fn test_falls_back_to_relational() {
        let dir = tempdir().unwrap();
        let mut settings = StorageConfig::at(dir.path());
        settings.document.enabled = false;
        let env = Environment::probe(&settings);

        let storage = select_backend(&env, BackendPreference::Auto, MemorySink::new()).unwrap();
        assert_eq!(storage.kind(), BackendKind::Relational);
        assert!(matches!(
            select_backend(&env, BackendPreference::Document, MemorySink::new()),
            Err(StoreError::NoBackend)
        ));
    }

    #[test]
    fn test_no_backend() {
        let dir = tempdir().unwrap();
        let mut settings = StorageConfig::at(dir.path());
        settings.document.enabled = false;
        settings.relational.enabled = false;
        let env = Environment::probe(&settings);

        assert!(env.available().is_empty());
        assert!(matches!(
            select_backend(&env, BackendPreference::Auto, MemorySink::new()),
            Err(StoreError::NoBackend)
        ));
    }
}
