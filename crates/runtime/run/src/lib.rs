//! Running compiled model artifacts.
//!
//! A [`RunController`] prepares an artifact in a fresh Run context, runs it
//! on a worker thread and tears it down from a monitor thread. Artifacts
//! are reached only through the [`SimArtifact`] capability traits; the
//! default [`ProcessLoader`] runs each one as a child process speaking the
//! line protocol in [`protocol`].

mod capability;
mod controller;
mod error;
mod process;
pub mod protocol;
mod signals;
mod sink;

pub use capability::{
    Configurable, PropertyCache, PropertyObserver, Reportable, Runnable, SimArtifact,
};
pub use controller::{
    CompletionCallback, ControlListener, Controls, RunController, RunHandle, RunReport,
    RunSettings, StartOutcome, VcrState,
};
pub use error::{ExecutionFault, RunError};
pub use process::{ArtifactLoader, CLASSPATH_ENV, ProcessArtifact, ProcessLoader};
pub use signals::{RunSignals, Signal};
pub use sink::OutputSink;
