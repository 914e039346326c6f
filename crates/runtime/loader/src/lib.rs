//! Isolated loading contexts for compiled model artifacts.
//!
//! Generated models may keep global state (simulation clocks, random
//! number generators). Every execution therefore loads its artifact into
//! its own disposable Run context, layered on a per-session Stage context
//! and a process-wide Root context. See [`ContextArena`].

mod arena;
mod error;

pub use arena::{ContextArena, ContextId, Layer, LoadedArtifact};
pub use error::ResolutionError;
