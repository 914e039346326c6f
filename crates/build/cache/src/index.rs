//! On-disk form of the cache index.
//!
//! The index is a small JSON document: one hit record per compiled model
//! (`xml`, `class`, `package`, `digest`) and one miss record per model known
//! to fail (`file`, `digest`). Saves go through a temp file and a rename so
//! a crash mid-write leaves the previous index intact.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::fingerprint::Fingerprint;

/// Current schema version. Bump when the index format changes.
pub(crate) const INDEX_VERSION: u32 = 1;

/// Serialized cache index.
#[derive(Serialize, Deserialize)]
pub(crate) struct IndexFile {
    pub version: u32,
    /// Hash of compiler identity and classpath the entries were built with.
    pub environment: String,
    #[serde(default)]
    pub entries: Vec<HitRecord>,
    #[serde(default)]
    pub misses: Vec<MissRecord>,
}

/// A compiled model.
#[derive(Serialize, Deserialize)]
pub(crate) struct HitRecord {
    pub xml: PathBuf,
    pub class: PathBuf,
    pub package: String,
    pub digest: Fingerprint,
}

/// A model that failed to compile in its recorded content state.
#[derive(Serialize, Deserialize)]
pub(crate) struct MissRecord {
    pub file: PathBuf,
    pub digest: Fingerprint,
}

impl IndexFile {
    pub fn empty(environment: &str) -> Self {
        Self {
            version: INDEX_VERSION,
            environment: environment.to_string(),
            entries: Vec::new(),
            misses: Vec::new(),
        }
    }

    /// Load the index from `path`.
    ///
    /// Returns `None` if the file is missing, corrupt, or has a version mismatch.
    pub fn load(path: &Path) -> Option<Self> {
        let data = fs::read_to_string(path).ok()?;
        let index: Self = match serde_json::from_str(&data) {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cache index corrupt, starting empty");
                return None;
            }
        };
        if index.version != INDEX_VERSION {
            tracing::debug!(found = index.version, expected = INDEX_VERSION, "cache index version mismatch");
            return None;
        }
        Some(index)
    }

    /// Save atomically (write to tmp, then rename).
    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let json = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, json).map_err(|e| CacheError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| CacheError::io(path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_documented_field_names() {
        let mut index = IndexFile::empty("env");
        index.entries.push(HitRecord {
            xml: PathBuf::from("/p/model.xml"),
            class: PathBuf::from("/p/build/classes/demo/Model_1"),
            package: "demo".into(),
            digest: Fingerprint::from_hex("abc"),
        });
        index.misses.push(MissRecord {
            file: PathBuf::from("/p/broken.xml"),
            digest: Fingerprint::from_hex("def"),
        });

        let json: serde_json::Value = serde_json::to_value(&index).unwrap();
        let hit = &json["entries"][0];
        assert_eq!(hit["xml"], "/p/model.xml");
        assert_eq!(hit["class"], "/p/build/classes/demo/Model_1");
        assert_eq!(hit["digest"], "abc");
        let miss = &json["misses"][0];
        assert_eq!(miss["file"], "/p/broken.xml");
        assert_eq!(miss["digest"], "def");
    }

    #[test]
    fn corrupt_or_foreign_index_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        fs::write(&path, "{ not json").unwrap();
        assert!(IndexFile::load(&path).is_none());

        let mut index = IndexFile::empty("env");
        index.version = INDEX_VERSION + 1;
        index.save(&path).unwrap();
        assert!(IndexFile::load(&path).is_none());
    }

    #[test]
    fn save_replaces_previous_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/index.json");

        IndexFile::empty("first").save(&path).unwrap();
        IndexFile::empty("second").save(&path).unwrap();

        let loaded = IndexFile::load(&path).unwrap();
        assert_eq!(loaded.environment, "second");
        assert!(!dir.path().join("nested/index.json.tmp").exists());
    }
}
