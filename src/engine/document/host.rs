//! Negotiation host for the document backend

use crate::engine::config::StoreConfig;
use crate::engine::error::{Result, StoreError};
use crate::engine::negotiator::{ContainerHost, Opened};

use super::database::{DocDatabase, DocFactory, OpenOutcome, TxMode, VersionApi, VersionChange};
use super::error::DocError;

/// Drives a [`DocFactory`] through version negotiation for one store
#[derive(Debug, Clone)]
pub struct DocumentHost {
    factory: DocFactory,
    config: StoreConfig,
}

impl DocumentHost {
    pub fn new(factory: DocFactory, config: StoreConfig) -> Self {
        Self { factory, config }
    }

    fn versioned_open(&self, version: u32) -> Result<OpenOutcome> {
        self.factory
            .open(&self.config.name, version, &self.config.description)
            .map_err(open_error)
    }
}

fn open_error(error: DocError) -> StoreError {
    match error {
        DocError::VersionError { requested, current } => StoreError::VersionConflict { requested, current },
        other => StoreError::Open(other.to_string()),
    }
}

impl ContainerHost for DocumentHost {
    type Handle = DocDatabase;
    type Mutation = VersionChange;

    fn open(&self, version: u32) -> Result<Opened<DocDatabase, VersionChange>> {
        match self.factory.features().versioning {
            VersionApi::OnOpen => match self.versioned_open(version)? {
                OpenOutcome::Success(db) => Ok(Opened::Ready(db)),
                OpenOutcome::UpgradeNeeded(change) => Ok(Opened::UpgradeNeeded(change)),
            },
            VersionApi::Explicit => self
                .factory
                .open_unversioned(&self.config.name, &self.config.description)
                .map(Opened::Ready)
                .map_err(open_error),
        }
    }

    fn version(&self, handle: &DocDatabase) -> u32 {
        handle.version()
    }

    fn has_container(&self, handle: &DocDatabase) -> Result<bool> {
        Ok(handle.contains(&self.config.store_name))
    }

    fn confirm(&self, handle: &DocDatabase) -> Result<()> {
        handle
            .transaction(&[self.config.store_name.as_str()], TxMode::ReadOnly)
            .map(|tx| tx.abort())
            .map_err(open_error)
    }

    fn enter_mutation(&self, handle: DocDatabase, version: u32) -> Result<VersionChange> {
        match self.factory.features().versioning {
            VersionApi::OnOpen => {
                handle.close();
                match self.versioned_open(version)? {
                    OpenOutcome::UpgradeNeeded(change) => Ok(change),
                    OpenOutcome::Success(_) => Err(StoreError::Blocked(format!(
                        "open at version {} did not grant an upgrade",
                        version
                    ))),
                }
            }
            VersionApi::Explicit => handle.set_version(version).map_err(open_error),
        }
    }

    fn prepare(&self, mutation: &mut VersionChange) -> Result<()> {
        let store = &self.config.store_name;
        if !mutation.contains(store) {
            mutation
                .create_object_store(store, &self.config.key_path, self.config.auto_increment)
                .map_err(|e| StoreError::Open(e.to_string()))?;
        }
        for index in &self.config.indexes {
            if !mutation.has_index(store, &index.name) {
                mutation
                    .create_index(store, &index.name, &index.field, index.unique)
                    .map_err(|e| StoreError::Index(e.to_string()))?;
            }
        }
        Ok(())
    }

    fn commit(&self, mutation: VersionChange) -> Result<DocDatabase> {
        mutation.commit().map_err(|e| StoreError::Open(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::IndexSpec;
    use crate::engine::document::database::DocFeatures;
    use crate::engine::logging::MemorySink;
    use crate::engine::negotiator::negotiate;
    use tempfile::tempdir;

    fn config() -> StoreConfig {
        StoreConfig::new("IDB", "Store", 1, "id", true).with_index(IndexSpec::new("name", "name", false))
    }

    #[tokio::test]
    async fn test_negotiates_fresh_database() {
        let dir = tempdir().unwrap();
        let host = DocumentHost::new(DocFactory::new(dir.path(), DocFeatures::default()), config());

        let negotiated = negotiate(host, 1, MemorySink::new()).await.unwrap();
        assert_eq!(negotiated.version, 1);
        assert!(negotiated.handle.contains("Store"));
        assert_eq!(negotiated.handle.index_names("Store").unwrap(), vec!["name".to_string()]);
    }

    #[tokio::test]
    async fn test_newer_database_is_adopted() {
        let dir = tempdir().unwrap();
        let factory = DocFactory::new(dir.path(), DocFeatures::default());
        let mut newer = config();
        newer.version = 2;
        negotiate(DocumentHost::new(factory.clone(), newer), 2, MemorySink::new())
            .await
            .unwrap()
            .handle
            .close();

        let negotiated = negotiate(DocumentHost::new(factory, config()), 1, MemorySink::new())
            .await
            .unwrap();
        assert_eq!(negotiated.version, 2);
        assert_eq!(negotiated.attempts, 2);
    }

    #[tokio::test]
    async fn test_second_store_bumps_version() {
        let dir = tempdir().unwrap();
        let factory = DocFactory::new(dir.path(), DocFeatures::default());
        negotiate(DocumentHost::new(factory.clone(), config()), 1, MemorySink::new())
            .await
            .unwrap()
            .handle
            .close();

        let other = StoreConfig::new("IDB", "Other", 1, "key", false);
        let negotiated = negotiate(DocumentHost::new(factory, other), 1, MemorySink::new())
            .await
            .unwrap();
        assert_eq!(negotiated.version, 2);
        assert!(negotiated.handle.contains("Store"));
        assert!(negotiated.handle.contains("Other"));
    }

    #[tokio::test]
    async fn test_legacy_versioning() {
        let dir = tempdir().unwrap();
        let features = DocFeatures {
            versioning: VersionApi::Explicit,
            ..DocFeatures::default()
        };
        let host = DocumentHost::new(DocFactory::new(dir.path(), features), config());

        let negotiated = negotiate(host, 3, MemorySink::new()).await.unwrap();
        assert_eq!(negotiated.version, 3);
        assert_eq!(negotiated.attempts, 1);
        assert!(negotiated.handle.contains("Store"));
    }
}
