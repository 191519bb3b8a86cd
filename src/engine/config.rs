//! callprof Configuration Module
//! Handles loading and validating callprof.config.json and the per-store settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE: &str = "callprof.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid store config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub project: ProjectConfig,
    pub storage: StorageConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub profiling: ProfilingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
}

/// Which storage backend the selector should hand out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    #[default]
    Auto,
    Document,
    Relational,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendPreference,
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub document: DocumentApiConfig,
    #[serde(default)]
    pub relational: RelationalApiConfig,
}

/// Capabilities of the document API in this environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Versions are set with an explicit step after opening instead of on open
    #[serde(default)]
    pub legacy_versioning: bool,
    #[serde(default = "default_true")]
    pub auto_increment: bool,
    /// Bulk `get_all` primitive; without it reads fall back to a cursor walk
    #[serde(default = "default_true")]
    pub bulk_get_all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationalApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub in_memory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_profile_table")]
    pub table: String,
}

/// A secondary index declared on the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub field: String,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(name: &str, field: &str, unique: bool) -> Self {
        Self {
            name: name.to_string(),
            field: field.to_string(),
            unique,
        }
    }
}

/// Settings for one store. Immutable once the store is opened; raising
/// `version` triggers the upgrade path on the next open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: u32,
    pub store_name: String,
    pub key_path: String,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

impl StoreConfig {
    pub fn new(name: &str, store_name: &str, version: u32, key_path: &str, auto_increment: bool) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            version,
            store_name: store_name.to_string(),
            key_path: key_path.to_string(),
            auto_increment,
            indexes: Vec::new(),
        }
    }

    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version == 0 {
            return Err(ConfigError::Invalid("version must be at least 1".to_string()));
        }
        for (label, value) in [("name", &self.name), ("store_name", &self.store_name), ("key_path", &self.key_path)] {
            if value.is_empty() {
                return Err(ConfigError::Invalid(format!("{} cannot be empty", label)));
            }
        }
        if !is_safe_name(&self.name) || !is_safe_name(&self.store_name) {
            return Err(ConfigError::Invalid(
                "names must be alphanumeric, '_' or '-'".to_string(),
            ));
        }
        Ok(())
    }
}

/// Names end up as directory names and SQL identifiers
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('_')
        && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

fn default_true() -> bool {
    true
}

fn default_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("callprof")
}

fn default_profile_table() -> String {
    "profiles".to_string()
}

impl Default for DocumentApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            legacy_versioning: false,
            auto_increment: true,
            bulk_get_all: true,
        }
    }
}

impl Default for RelationalApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            in_memory: false,
        }
    }
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            table: default_profile_table(),
        }
    }
}

impl StorageConfig {
    pub fn at(root: &Path) -> Self {
        Self {
            backend: BackendPreference::Auto,
            root: root.to_path_buf(),
            document: DocumentApiConfig::default(),
            relational: RelationalApiConfig::default(),
        }
    }
}

impl Config {
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path));
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.store.validate()?;
        Ok(config)
    }

    /// Load the project config, falling back to defaults when none exists yet
    pub fn load_or_default(project_dir: &Path) -> Result<Self, ConfigError> {
        match Self::load(project_dir) {
            Err(ConfigError::NotFound(_)) => {
                let name = project_dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .filter(|n| is_safe_name(n))
                    .unwrap_or("default");
                Ok(Self::default_for_project(name))
            }
            other => other,
        }
    }

    pub fn save(&self, project_dir: &Path) -> Result<(), ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn default_for_project(name: &str) -> Self {
        Self {
            version: "0.1.0".to_string(),
            project: ProjectConfig {
                name: name.to_string(),
            },
            storage: StorageConfig {
                backend: BackendPreference::Auto,
                root: default_root(),
                document: DocumentApiConfig::default(),
                relational: RelationalApiConfig::default(),
            },
            store: StoreConfig::new("profiling", "samples", 1, "id", true)
                .with_description("callprof samples")
                .with_index(IndexSpec::new("name", "name", false)),
            profiling: ProfilingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_save_load() {
        let dir = tempdir().unwrap();
        let mut config = Config::default_for_project("demo");
        config.storage.root = dir.path().join("data");
        config.save(dir.path()).unwrap();

        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.project.name, "demo");
        assert_eq!(loaded.store.key_path, "id");
        assert_eq!(loaded.store.indexes.len(), 1);
        assert_eq!(loaded.storage.backend, BackendPreference::Auto);
    }

    #[test]
    fn test_missing_config_defaults() {
        let dir = tempdir().unwrap();
        assert!(matches!(Config::load(dir.path()), Err(ConfigError::NotFound(_))));
        let config = Config::load_or_default(dir.path()).unwrap();
        assert_eq!(config.store.version, 1);
    }

    #[test]
    fn test_store_config_validation() {
        assert!(StoreConfig::new("IDB", "Store", 1, "id", true).validate().is_ok());
        assert!(StoreConfig::new("IDB", "Store", 0, "id", true).validate().is_err());
        assert!(StoreConfig::new("IDB", "", 1, "id", true).validate().is_err());
        assert!(StoreConfig::new("../x", "Store", 1, "id", true).validate().is_err());
    }

    #[test]
    fn test_partial_storage_section() {
        let json = r#"{"backend": "relational", "root": "/tmp/cp"}"#;
        let storage: StorageConfig = serde_json::from_str(json).unwrap();
        assert_eq!(storage.backend, BackendPreference::Relational);
        assert!(storage.document.enabled);
        assert!(storage.document.bulk_get_all);
        assert!(!storage.relational.in_memory);
    }
}
