//! Content-fingerprinted cache of compiled model artifacts.
//!
//! Maps a model source file to the executable compiled from it. Validity is
//! decided by content, not timestamps: the fingerprint over the source and
//! the artifact is recorded at store time and rechecked on every lookup.
//! Sources that failed to compile are remembered as misses until their
//! content changes, so a broken model is not recompiled on every request.

mod cache;
mod error;
mod fingerprint;
mod index;

pub use cache::{ArtifactCache, ArtifactDescriptor, CacheMissRecord};
pub use error::CacheError;
pub use fingerprint::{Fingerprint, environment_hash, fingerprint, hash_bytes};
