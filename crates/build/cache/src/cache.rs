//! Persistent cache mapping model files to compiled artifacts.
//!
//! Entries are keyed by the absolute source path. Each hit stores the
//! fingerprint computed over `{source, artifact}` at store time; a lookup
//! recomputes it and treats any difference as staleness. Stale entries are
//! deleted together with their artifact file and reported as absent.
//!
//! Miss records remember that a source failed to compile in a given content
//! state. They expire on their own as soon as the source changes.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::CacheError;
use crate::fingerprint::{Fingerprint, fingerprint};
use crate::index::{HitRecord, IndexFile, MissRecord};

/// A compiled artifact known to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    /// The model file the artifact was generated from.
    pub source_path: PathBuf,
    /// The compiled executable.
    pub artifact_path: PathBuf,
    /// Package the generated type was declared in.
    pub package_name: String,
    /// Fingerprint over `{source_path, artifact_path}` at store time.
    pub fingerprint: Fingerprint,
}

/// A source known to fail compilation in its recorded content state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMissRecord {
    /// The model file that failed.
    pub source_path: PathBuf,
    /// Fingerprint of the source at the time of the failure.
    pub fingerprint: Fingerprint,
}

/// Content-addressed artifact cache, persisted as a JSON index.
///
/// Owned by the project/session; there is no process-wide instance.
pub struct ArtifactCache {
    index_path: PathBuf,
    environment: String,
    entries: BTreeMap<PathBuf, ArtifactDescriptor>,
    misses: BTreeMap<PathBuf, CacheMissRecord>,
}

impl ArtifactCache {
    /// Open the cache persisted at `index_path`.
    ///
    /// `environment` is the hash of the compiler identity and classpath (see
    /// [`crate::environment_hash`]). If the stored index was built under a
    /// different environment, every entry is discarded and its artifact
    /// deleted, so the next request recompiles against the current toolchain.
    pub fn open(index_path: impl Into<PathBuf>, environment: &str) -> Result<Self, CacheError> {
        let index_path = index_path.into();
        let mut cache = Self {
            index_path,
            environment: environment.to_string(),
            entries: BTreeMap::new(),
            misses: BTreeMap::new(),
        };

        let Some(index) = IndexFile::load(&cache.index_path) else {
            return Ok(cache);
        };

        for hit in index.entries {
            cache.entries.insert(
                hit.xml.clone(),
                ArtifactDescriptor {
                    source_path: hit.xml,
                    artifact_path: hit.class,
                    package_name: hit.package,
                    fingerprint: hit.digest,
                },
            );
        }
        for miss in index.misses {
            cache.misses.insert(
                miss.file.clone(),
                CacheMissRecord {
                    source_path: miss.file,
                    fingerprint: miss.digest,
                },
            );
        }

        if index.environment != cache.environment {
            tracing::info!(
                entries = cache.entries.len(),
                "toolchain or classpath changed, discarding cached artifacts"
            );
            cache.clear()?;
        }

        Ok(cache)
    }

    /// Path of the persisted index.
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Return the cached artifact for `source`, if present and not stale.
    ///
    /// A stale hit is deleted (entry and artifact file) and reported as
    /// absent. Failures while cleaning up are logged, never surfaced.
    pub fn lookup(&mut self, source: &Path) -> Option<ArtifactDescriptor> {
        let key = normalize(source);
        let entry = self.entries.get(&key)?;

        if !is_entry_stale(entry) {
            tracing::debug!(source = %key.display(), "cache hit");
            return Some(entry.clone());
        }

        tracing::warn!(
            source = %key.display(),
            artifact = %entry.artifact_path.display(),
            "cached artifact is stale, deleting"
        );
        if let Err(e) = self.remove_entry(&key) {
            tracing::warn!(error = %e, "failed to clean up stale cache entry");
        }
        None
    }

    /// Returns `true` if `source` has an entry whose fingerprint no longer
    /// matches the files on disk. Absent entries are not stale.
    pub fn is_stale(&self, source: &Path) -> bool {
        self.entries
            .get(&normalize(source))
            .is_some_and(is_entry_stale)
    }

    /// Record a successful compile, replacing any previous entry for
    /// `source` and clearing its miss record.
    pub fn store(
        &mut self,
        source: &Path,
        artifact: &Path,
        package_name: &str,
    ) -> Result<ArtifactDescriptor, CacheError> {
        let source_path = normalize(source);
        let artifact_path = normalize(artifact);
        let descriptor = ArtifactDescriptor {
            fingerprint: fingerprint(&[&source_path, &artifact_path]),
            source_path: source_path.clone(),
            artifact_path,
            package_name: package_name.to_string(),
        };

        self.misses.remove(&source_path);
        self.entries.insert(source_path, descriptor.clone());
        self.persist()?;

        tracing::debug!(
            source = %descriptor.source_path.display(),
            fingerprint = %descriptor.fingerprint,
            "cache store"
        );
        Ok(descriptor)
    }

    /// Remember that `source`, in its current content state, failed to compile.
    pub fn record_miss(&mut self, source: &Path) -> Result<CacheMissRecord, CacheError> {
        let source_path = normalize(source);
        let record = CacheMissRecord {
            fingerprint: fingerprint(&[&source_path]),
            source_path: source_path.clone(),
        };
        self.misses.insert(source_path, record.clone());
        self.persist()?;
        Ok(record)
    }

    /// Returns `true` while `source` still has the content it had when its
    /// miss was recorded.
    pub fn is_miss(&self, source: &Path) -> bool {
        let key = normalize(source);
        match self.misses.get(&key) {
            Some(record) => record.fingerprint == fingerprint(&[&key]),
            None => false,
        }
    }

    /// Remove the entry and miss record for `source`, deleting the artifact.
    ///
    /// Returns `true` if anything was removed.
    pub fn invalidate(&mut self, source: &Path) -> Result<bool, CacheError> {
        let key = normalize(source);
        let had_miss = self.misses.remove(&key).is_some();
        if self.entries.contains_key(&key) {
            self.remove_entry(&key)?;
            return Ok(true);
        }
        if had_miss {
            self.persist()?;
        }
        Ok(had_miss)
    }

    /// Drop every entry and miss record, deleting all cached artifacts.
    ///
    /// Returns the number of artifact entries removed.
    pub fn clear(&mut self) -> Result<usize, CacheError> {
        let removed = self.entries.len();
        for entry in self.entries.values() {
            delete_artifact(&entry.artifact_path)?;
        }
        self.entries.clear();
        self.misses.clear();
        self.persist()?;
        Ok(removed)
    }

    /// All artifact entries, ordered by source path.
    pub fn entries(&self) -> impl Iterator<Item = &ArtifactDescriptor> {
        self.entries.values()
    }

    /// All miss records, ordered by source path.
    pub fn misses(&self) -> impl Iterator<Item = &CacheMissRecord> {
        self.misses.values()
    }

    fn remove_entry(&mut self, key: &Path) -> Result<(), CacheError> {
        if let Some(entry) = self.entries.remove(key) {
            delete_artifact(&entry.artifact_path)?;
        }
        self.persist()
    }

    fn persist(&self) -> Result<(), CacheError> {
        let mut index = IndexFile::empty(&self.environment);
        index.entries = self
            .entries
            .values()
            .map(|e| HitRecord {
                xml: e.source_path.clone(),
                class: e.artifact_path.clone(),
                package: e.package_name.clone(),
                digest: e.fingerprint.clone(),
            })
            .collect();
        index.misses = self
            .misses
            .values()
            .map(|m| MissRecord {
                file: m.source_path.clone(),
                digest: m.fingerprint.clone(),
            })
            .collect();
        index.save(&self.index_path)
    }
}

fn is_entry_stale(entry: &ArtifactDescriptor) -> bool {
    fingerprint(&[&entry.source_path, &entry.artifact_path]) != entry.fingerprint
}

fn delete_artifact(path: &Path) -> Result<(), CacheError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

/// Cache keys are absolute paths; relative inputs are resolved against the
/// current directory without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
