//! The interface every generated artifact implements.
//!
//! The controller never looks up operations by name: an artifact is
//! something it can configure, run and ask for a report.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::ExecutionFault;
use crate::signals::RunSignals;
use crate::sink::OutputSink;

/// Receives progress notifications from a running artifact.
pub trait PropertyObserver: Send + Sync {
    /// A property changed from `old` to `new`. Multi-replication runs
    /// report at least `replicationNumber`.
    fn property_changed(&self, name: &str, old: &str, new: &str);
}

/// Last known value of every property an artifact reported.
#[derive(Clone, Default)]
pub struct PropertyCache {
    values: Arc<Mutex<BTreeMap<String, String>>>,
}

impl PropertyCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name = value`.
    pub fn set(&self, name: &str, value: &str) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.to_string());
    }

    /// Current value of `name`.
    pub fn get(&self, name: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Copy of all values.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Executes the model.
pub trait Runnable {
    /// Run to completion, or until stopped. Called at most once.
    fn run(&mut self) -> Result<(), ExecutionFault>;
}

/// Configuration surface bound by the controller before a run.
pub trait Configurable {
    /// Enable verbose model output.
    fn set_verbose(&mut self, verbose: bool);
    /// Simulation time at which to stop.
    fn set_stop_time(&mut self, stop_time: f64);
    /// Number of replications.
    fn set_replications(&mut self, replications: u32);
    /// Where model output goes.
    fn set_output_sink(&mut self, sink: OutputSink);
    /// Start in single-step mode.
    fn set_single_step(&mut self, single_step: bool);
    /// Cache to keep property values in.
    fn set_property_cache(&mut self, cache: PropertyCache);
    /// Register a progress observer.
    fn add_observer(&mut self, observer: Arc<dyn PropertyObserver>);
    /// Control channel for stop and step requests during the run.
    fn bind_signals(&mut self, signals: Arc<RunSignals>);
}

/// Exposes run results.
pub trait Reportable {
    /// The report file the run produced, if any.
    fn report_path(&self) -> Option<PathBuf>;
}

/// A loaded, runnable artifact.
pub trait SimArtifact: Runnable + Configurable + Reportable + Send {}

impl<T: Runnable + Configurable + Reportable + Send> SimArtifact for T {}

/// Observer recording every notification into a [`PropertyCache`] and
/// forwarding it to further observers.
pub(crate) struct Fanout {
    pub cache: Option<PropertyCache>,
    pub observers: Vec<Arc<dyn PropertyObserver>>,
}

impl Fanout {
    pub fn notify(&self, name: &str, old: &str, new: &str) {
        if let Some(cache) = &self.cache {
            cache.set(name, new);
        }
        for observer in &self.observers {
            observer.property_changed(name, old, new);
        }
    }
}
