//! Database meta information for the document store
//!
//! Holds the database version and the object store catalog in `_meta.json`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::error::{DocError, Result};

/// Current on-disk format version supported by this engine
pub const CURRENT_FORMAT_VERSION: u32 = 1;

/// Minimum on-disk format version we can read
pub const MIN_FORMAT_VERSION: u32 = 1;

pub const META_FILE: &str = "_meta.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub field: String,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub key_path: String,
    #[serde(default)]
    pub auto_increment: bool,
    /// Next value handed out by the key generator
    #[serde(default = "first_key")]
    pub next_key: i64,
    #[serde(default)]
    pub indexes: BTreeMap<String, IndexMeta>,
}

fn first_key() -> i64 {
    1
}

impl StoreMeta {
    pub fn new(key_path: &str, auto_increment: bool) -> Self {
        Self {
            key_path: key_path.to_string(),
            auto_increment,
            next_key: first_key(),
            indexes: BTreeMap::new(),
        }
    }
}

/// Meta information stored in _meta.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbMeta {
    /// Engine identifier
    pub engine: String,

    /// On-disk format version
    pub format_version: u32,

    /// Database schema version, raised by every upgrade
    pub version: u32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    pub created_at: DateTime<Utc>,

    pub modified_at: DateTime<Utc>,

    #[serde(default)]
    pub stores: BTreeMap<String, StoreMeta>,
}

impl DbMeta {
    /// Meta for a database that does not exist on disk yet (version 0)
    pub fn new(description: &str) -> Self {
        let now = Utc::now();
        Self {
            engine: "callprof-document".to_string(),
            format_version: CURRENT_FORMAT_VERSION,
            version: 0,
            description: description.to_string(),
            created_at: now,
            modified_at: now,
            stores: BTreeMap::new(),
        }
    }

    /// Load meta from a database directory; `None` when the database is absent
    pub fn load(db_path: &Path) -> Result<Option<Self>> {
        let meta_path = db_path.join(META_FILE);
        if !meta_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&meta_path)?;
        let meta: DbMeta = serde_json::from_str(&content)?;

        if meta.format_version < MIN_FORMAT_VERSION || meta.format_version > CURRENT_FORMAT_VERSION {
            return Err(DocError::UnsupportedFormatVersion {
                found: meta.format_version,
                min: MIN_FORMAT_VERSION,
                max: CURRENT_FORMAT_VERSION,
            });
        }

        Ok(Some(meta))
    }

    pub fn save(&self, db_path: &Path) -> Result<()> {
        fs::create_dir_all(db_path)?;
        let meta_path = db_path.join(META_FILE);
        let content = serde_json::to_string_pretty(self)?;
        fs::write(meta_path, content)?;
        Ok(())
    }

    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }

    pub fn store(&self, name: &str) -> Result<&StoreMeta> {
        self.stores
            .get(name)
            .ok_or_else(|| DocError::StoreNotFound(name.to_string()))
    }

    pub fn store_mut(&mut self, name: &str) -> Result<&mut StoreMeta> {
        self.stores
            .get_mut(name)
            .ok_or_else(|| DocError::StoreNotFound(name.to_string()))
    }
}
