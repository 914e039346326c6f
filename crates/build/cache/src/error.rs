//! Error types for the artifact cache.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while persisting or mutating the cache.
///
/// Staleness is not an error: a stale entry is deleted and reported as a
/// miss by [`crate::ArtifactCache::lookup`].
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading or writing the index, or deleting an artifact, failed.
    #[error("cache I/O error on {}: {source}", path.display())]
    Io {
        /// The file being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The index could not be serialized.
    #[error("failed to serialize cache index: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
