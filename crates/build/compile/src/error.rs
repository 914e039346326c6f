//! Failures on the way from a model file to a runnable artifact.

use std::io;
use std::path::PathBuf;

use simforge_cache::CacheError;
use thiserror::Error;

use crate::compiler::Diagnostic;
use crate::generator::GenerationFailure;
use crate::source::MalformedSource;

/// Why no artifact could be produced for a model.
///
/// Every variant is an expected, reportable outcome. Stale cache entries
/// are not represented here: they are repaired inside the cache.
#[derive(Debug, Error)]
pub enum BuildFailure {
    /// The generator could not translate the model.
    #[error(transparent)]
    Generation(#[from] GenerationFailure),
    /// Generated source lacks a recognisable package/type declaration.
    #[error("malformed generated source: {0}")]
    MalformedSource(#[from] MalformedSource),
    /// The native compiler rejected the source.
    #[error("compilation failed: {0}")]
    Compile(Diagnostic),
    /// The model failed to compile before and has not changed since.
    #[error("{} failed to compile previously and is unchanged", .0.display())]
    KnownMiss(PathBuf),
    /// Another model already owns the artifact this one would compile to.
    #[error(
        "{} declares {class}, which {} already compiles to; invalidate one of them first",
        model.display(),
        owner.display()
    )]
    ClassConflict {
        /// The model being built.
        model: PathBuf,
        /// Qualified name both models declare.
        class: String,
        /// The model holding the cache entry.
        owner: PathBuf,
    },
    /// The cache index could not be updated.
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// Writing generated source or preparing output failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The file being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl BuildFailure {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
