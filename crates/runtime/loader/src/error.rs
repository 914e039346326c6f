//! Context resolution failures.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::arena::{ContextId, Layer};

/// An artifact or context could not be resolved.
///
/// Never answered by falling back to a lower layer: a miss in the layer
/// that should hold an artifact is reported, not papered over.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// No context with this id exists in the arena.
    #[error("unknown loading context {0}")]
    UnknownContext(ContextId),
    /// Artifacts can only be loaded into a Run context.
    #[error("loading context {id} is a {layer} context, not a run context")]
    NotRunContext {
        /// The context used.
        id: ContextId,
        /// Its actual layer.
        layer: Layer,
    },
    /// A Run context loads exactly one artifact, once.
    #[error("loading context {id} already loaded {}", name.display())]
    AlreadyLoaded {
        /// The context used.
        id: ContextId,
        /// Name of the artifact it already holds.
        name: PathBuf,
    },
    /// The artifact is not present in the layer that should hold it.
    #[error("{} not found in the {layer} layer", name.display())]
    NotFound {
        /// Artifact name, relative to the layer's search paths.
        name: PathBuf,
        /// Layer that was searched.
        layer: Layer,
    },
    /// Creating the per-run snapshot failed.
    #[error("failed to snapshot artifact into {}: {source}", path.display())]
    Snapshot {
        /// Snapshot path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}
