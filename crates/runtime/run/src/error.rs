//! Run-time failure types.

use std::io;
use std::path::PathBuf;

use simforge_loader::ResolutionError;
use thiserror::Error;

/// A run started but did not complete normally.
///
/// Delivered through the completion report, never propagated as a panic
/// on a background thread.
#[derive(Debug, Error)]
pub enum ExecutionFault {
    /// The model reported an error.
    #[error("model raised: {0}")]
    Raised(String),
    /// The artifact exited without completing.
    #[error("artifact exited before completing ({status}){}", fmt_stderr(.stderr))]
    Exited {
        /// Exit status as reported by the OS.
        status: String,
        /// Tail of the artifact's stderr.
        stderr: String,
    },
    /// The run body panicked.
    #[error("run panicked: {0}")]
    Panicked(String),
    /// The artifact violated the line protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// Talking to the artifact failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being done.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

fn fmt_stderr(stderr: &str) -> String {
    let tail = stderr.trim();
    if tail.is_empty() {
        String::new()
    } else {
        format!(": {tail}")
    }
}

/// The controller could not prepare or start a run.
#[derive(Debug, Error)]
pub enum RunError {
    /// `start` was called with nothing prepared.
    #[error("no artifact has been prepared")]
    NotPrepared,
    /// `prepare` was called while a run is in progress.
    #[error("a run is already in progress")]
    SessionActive,
    /// The artifact could not be resolved in its Run context.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    /// The resolved artifact could not be instantiated.
    #[error("failed to load {}: {reason}", path.display())]
    Load {
        /// The artifact.
        path: PathBuf,
        /// Why.
        reason: String,
    },
    /// A worker or monitor thread could not be spawned.
    #[error("failed to spawn {role} thread: {source}")]
    Thread {
        /// `"worker"` or `"monitor"`.
        role: &'static str,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}
