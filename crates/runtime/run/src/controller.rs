//! Run lifecycle controller.
//!
//! Drives one execution at a time through a VCR-style state machine
//! (Rewound, Running, Stopped, with Stepped for single-event advancement).
//! State changes only update what is displayed and which controls are
//! enabled; the work happens on two threads per run:
//!
//! - the **worker** executes the artifact's `run` body;
//! - the **monitor** joins the worker, extracts the report, disposes the
//!   Run context and invokes the completion callback.
//!
//! A guard counter admits at most one session per controller.

use std::any::Any;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use simforge_cache::ArtifactDescriptor;
use simforge_loader::{ContextArena, ContextId, Layer, ResolutionError};

use crate::capability::{PropertyCache, PropertyObserver, SimArtifact};
use crate::error::{ExecutionFault, RunError};
use crate::process::{ArtifactLoader, artifact_name};
use crate::signals::RunSignals;
use crate::sink::OutputSink;

/// Displayed state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcrState {
    /// Ready to run from the beginning.
    Rewound,
    /// A run is in progress.
    Running,
    /// The last run finished or was stopped.
    Stopped,
    /// Advancing one event at a time.
    Stepped,
}

/// Which controls are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Controls {
    /// Start a run.
    pub play: bool,
    /// Stop the running session.
    pub stop: bool,
    /// Advance one event.
    pub step: bool,
    /// Return to the start.
    pub rewind: bool,
}

impl VcrState {
    /// Controls enabled in this state.
    pub fn controls(self) -> Controls {
        match self {
            Self::Rewound => Controls {
                play: true,
                stop: false,
                step: true,
                rewind: false,
            },
            Self::Running => Controls {
                play: false,
                stop: true,
                step: true,
                rewind: false,
            },
            Self::Stopped => Controls {
                play: true,
                stop: false,
                step: true,
                rewind: true,
            },
            Self::Stepped => Controls {
                play: true,
                stop: true,
                step: true,
                rewind: false,
            },
        }
    }
}

/// Notified of every state change, e.g. to update buttons.
pub trait ControlListener: Send + Sync {
    /// The controller moved to `state`.
    fn state_changed(&self, state: VcrState, controls: Controls);
}

/// Settings bound to every prepared artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    /// Verbose model output.
    pub verbose: bool,
    /// Simulation stop time; the model's own default when `None`.
    pub stop_time: Option<f64>,
    /// Number of replications.
    pub replications: u32,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            verbose: false,
            stop_time: None,
            replications: 1,
        }
    }
}

/// Result of one run, produced by the monitor thread.
#[derive(Debug)]
pub struct RunReport {
    /// Controller-local run number.
    pub run_id: u64,
    /// The artifact that ran.
    pub artifact: PathBuf,
    /// How the run ended.
    pub outcome: Result<(), ExecutionFault>,
    /// Report file produced by the run, if any.
    pub report_path: Option<PathBuf>,
    /// Wall-clock time from start to worker exit.
    pub elapsed: Duration,
    /// Last value of every property the artifact reported.
    pub final_properties: BTreeMap<String, String>,
}

impl RunReport {
    /// Whether the run completed without a fault.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Called by the monitor thread when a run has been torn down.
pub type CompletionCallback = Arc<dyn Fn(&RunReport) + Send + Sync>;

/// What [`RunController::start`] did.
pub enum StartOutcome {
    /// A session started.
    Started(RunHandle),
    /// A session was already active; nothing happened.
    Rejected,
}

/// Handle on a started run.
pub struct RunHandle {
    run_id: u64,
    reports: mpsc::Receiver<RunReport>,
}

impl RunHandle {
    /// The run number.
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Block until the monitor has finished teardown.
    pub fn wait(self) -> Option<RunReport> {
        self.reports.recv().ok()
    }

    /// Like [`Self::wait`], giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<RunReport> {
        self.reports.recv_timeout(timeout).ok()
    }
}

struct Display {
    state: Mutex<VcrState>,
    listener: Option<Arc<dyn ControlListener>>,
}

impl Display {
    fn set(&self, state: VcrState) {
        {
            let mut current = lock(&self.state);
            if *current == state {
                return;
            }
            *current = state;
        }
        tracing::trace!(?state, "vcr state");
        if let Some(listener) = &self.listener {
            listener.state_changed(state, state.controls());
        }
    }

    /// End of a run: Running or Stepped become Stopped.
    fn finish(&self) {
        let state = *lock(&self.state);
        if matches!(state, VcrState::Running | VcrState::Stepped) {
            self.set(VcrState::Stopped);
        }
    }

    fn get(&self) -> VcrState {
        *lock(&self.state)
    }
}

struct ActiveRun {
    context: ContextId,
    signals: Arc<RunSignals>,
    sink: OutputSink,
}

struct Shared {
    guard: AtomicUsize,
    display: Display,
    active: Mutex<Option<ActiveRun>>,
}

struct PreparedRun {
    run_id: u64,
    context: ContextId,
    name: PathBuf,
    artifact: Box<dyn SimArtifact>,
    signals: Arc<RunSignals>,
    sink: OutputSink,
    properties: PropertyCache,
}

/// Drives executions of compiled artifacts, one at a time.
pub struct RunController {
    arena: Arc<Mutex<ContextArena>>,
    loader: Arc<dyn ArtifactLoader>,
    settings: RunSettings,
    sink: OutputSink,
    observers: Vec<Arc<dyn PropertyObserver>>,
    on_complete: Option<CompletionCallback>,
    shared: Arc<Shared>,
    prepared: Option<PreparedRun>,
    last_descriptor: Option<ArtifactDescriptor>,
    next_run_id: u64,
}

impl RunController {
    /// Controller loading artifacts through `loader` into contexts of `arena`.
    pub fn new(arena: Arc<Mutex<ContextArena>>, loader: Arc<dyn ArtifactLoader>) -> Self {
        Self {
            arena,
            loader,
            settings: RunSettings::default(),
            sink: OutputSink::stdout(),
            observers: Vec::new(),
            on_complete: None,
            shared: Arc::new(Shared {
                guard: AtomicUsize::new(0),
                display: Display {
                    state: Mutex::new(VcrState::Rewound),
                    listener: None,
                },
                active: Mutex::new(None),
            }),
            prepared: None,
            last_descriptor: None,
            next_run_id: 1,
        }
    }

    /// Use `settings` for every run prepared from now on.
    #[must_use]
    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Send model output to `sink`.
    #[must_use]
    pub fn with_output_sink(mut self, sink: OutputSink) -> Self {
        self.sink = sink;
        self
    }

    /// Report state changes to `listener`.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn ControlListener>) -> Self {
        self.shared = Arc::new(Shared {
            guard: AtomicUsize::new(0),
            display: Display {
                state: Mutex::new(self.shared.display.get()),
                listener: Some(listener),
            },
            active: Mutex::new(None),
        });
        self
    }

    /// Call `callback` from the monitor thread after every run.
    #[must_use]
    pub fn on_complete(mut self, callback: impl Fn(&RunReport) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(callback));
        self
    }

    /// Register a progress observer for every run prepared from now on.
    pub fn add_observer(&mut self, observer: Arc<dyn PropertyObserver>) {
        self.observers.push(observer);
    }

    /// Mutable access to the run settings.
    pub fn settings_mut(&mut self) -> &mut RunSettings {
        &mut self.settings
    }

    /// The displayed state.
    pub fn state(&self) -> VcrState {
        self.shared.display.get()
    }

    /// Whether a session is active.
    pub fn is_active(&self) -> bool {
        self.shared.guard.load(Ordering::Acquire) > 0
    }

    /// Load `descriptor`'s artifact into a new Run context and bind its
    /// configuration surface.
    ///
    /// Resolution failures are returned as [`RunError::Resolution`]; the
    /// caller should invalidate the cache entry so the next attempt
    /// recompiles. While a run is in progress nothing is touched and
    /// [`RunError::SessionActive`] is returned.
    pub fn prepare(&mut self, descriptor: &ArtifactDescriptor) -> Result<(), RunError> {
        if self.is_active() {
            return Err(RunError::SessionActive);
        }
        self.prepare_run(descriptor)
    }

    fn prepare_run(&mut self, descriptor: &ArtifactDescriptor) -> Result<(), RunError> {
        self.discard_prepared();
        let run_id = self.next_run_id;
        self.next_run_id += 1;

        let (context, loaded, search_path) = {
            let mut arena = lock(&self.arena);
            let context = arena.create_run();
            let loaded = artifact_name(arena.classes_dir(), &descriptor.artifact_path)
                .ok_or_else(|| ResolutionError::NotFound {
                    name: descriptor.artifact_path.clone(),
                    layer: Layer::Stage,
                })
                .and_then(|name| arena.load(context, &name));
            match loaded {
                Ok(loaded) => {
                    let search_path = arena.search_path(context);
                    (context, loaded, search_path)
                }
                Err(e) => {
                    let _ = arena.dispose(context);
                    return Err(e.into());
                }
            }
        };

        let mut artifact = match self.loader.instantiate(&loaded, &search_path) {
            Ok(artifact) => artifact,
            Err(e) => {
                let _ = lock(&self.arena).dispose(context);
                return Err(e);
            }
        };

        let signals = Arc::new(RunSignals::new());
        let sink = self.sink.session();
        let properties = PropertyCache::new();
        artifact.set_verbose(self.settings.verbose);
        if let Some(stop_time) = self.settings.stop_time {
            artifact.set_stop_time(stop_time);
        }
        artifact.set_replications(self.settings.replications);
        artifact.set_output_sink(sink.clone());
        artifact.set_single_step(false);
        artifact.set_property_cache(properties.clone());
        for observer in &self.observers {
            artifact.add_observer(Arc::clone(observer));
        }
        artifact.bind_signals(Arc::clone(&signals));

        if let Err(e) = lock(&self.arena).enter(context) {
            tracing::warn!(context = %context, error = %e, "could not enter run context");
        }
        tracing::info!(run_id, artifact = %loaded.name.display(), context = %context, "run prepared");

        self.prepared = Some(PreparedRun {
            run_id,
            context,
            name: loaded.name,
            artifact,
            signals,
            sink,
            properties,
        });
        self.last_descriptor = Some(descriptor.clone());
        self.shared.display.set(VcrState::Rewound);
        Ok(())
    }

    /// Start the prepared run.
    ///
    /// Returns [`StartOutcome::Rejected`] without side effects while a
    /// session is active. If the prepared run was already consumed, the
    /// last descriptor is prepared again in a fresh Run context.
    pub fn start(&mut self) -> Result<StartOutcome, RunError> {
        if self
            .shared
            .guard
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("session already active, start ignored");
            return Ok(StartOutcome::Rejected);
        }

        let result = self.take_prepared().and_then(|prepared| self.launch(prepared));
        match result {
            Ok(handle) => Ok(StartOutcome::Started(handle)),
            Err(e) => {
                self.shared.guard.fetch_sub(1, Ordering::AcqRel);
                Err(e)
            }
        }
    }

    /// Ask the running artifact to halt, release its output and return the
    /// current context to Stage. Always ends in [`VcrState::Stopped`].
    pub fn stop(&mut self) {
        if let Some(active) = lock(&self.shared.active).as_ref() {
            tracing::info!(context = %active.context, "stop requested");
            active.signals.request_stop();
            active.sink.release();
        }
        lock(&self.arena).restore_stage();
        self.shared.display.set(VcrState::Stopped);
    }

    /// Advance one event: switch the artifact to single-step mode and
    /// request a step.
    pub fn step(&mut self) {
        if let Some(active) = lock(&self.shared.active).as_ref() {
            active.signals.set_single_step(true);
            active.signals.request_step();
        } else if let Some(prepared) = &mut self.prepared {
            prepared.artifact.set_single_step(true);
        }
        self.shared.display.set(VcrState::Stepped);
    }

    /// Return the display to the start.
    pub fn rewind(&mut self) {
        self.shared.display.set(VcrState::Rewound);
    }

    fn take_prepared(&mut self) -> Result<PreparedRun, RunError> {
        if let Some(prepared) = self.prepared.take() {
            return Ok(prepared);
        }
        let descriptor = self.last_descriptor.clone().ok_or(RunError::NotPrepared)?;
        self.prepare_run(&descriptor)?;
        self.prepared.take().ok_or(RunError::NotPrepared)
    }

    fn launch(&mut self, prepared: PreparedRun) -> Result<RunHandle, RunError> {
        let PreparedRun {
            run_id,
            context,
            name,
            mut artifact,
            signals,
            sink,
            properties,
        } = prepared;

        *lock(&self.shared.active) = Some(ActiveRun {
            context,
            signals: Arc::clone(&signals),
            sink: sink.clone(),
        });
        self.shared.display.set(VcrState::Running);
        tracing::info!(run_id, artifact = %name.display(), "run started");
        let started = Instant::now();

        let worker = thread::Builder::new()
            .name(format!("simforge-run-{run_id}"))
            .spawn(move || {
                let outcome = artifact.run();
                (outcome, artifact.report_path())
            });
        let worker = match worker {
            Ok(worker) => worker,
            Err(source) => {
                self.abandon(context);
                return Err(RunError::Thread {
                    role: "worker",
                    source,
                });
            }
        };

        let (tx, reports) = mpsc::channel();
        let monitor = {
            let shared = Arc::clone(&self.shared);
            let arena = Arc::clone(&self.arena);
            let on_complete = self.on_complete.clone();
            let signals = Arc::clone(&signals);
            thread::Builder::new()
                .name(format!("simforge-monitor-{run_id}"))
                .spawn(move || {
                    let (outcome, report_path) = match worker.join() {
                        Ok(result) => result,
                        Err(payload) => (Err(ExecutionFault::Panicked(panic_message(&*payload))), None),
                    };
                    let elapsed = started.elapsed();
                    signals.finish();
                    sink.release();
                    if let Err(e) = lock(&arena).dispose(context) {
                        tracing::warn!(context = %context, error = %e, "failed to dispose run context");
                    }

                    let report = RunReport {
                        run_id,
                        artifact: name,
                        outcome,
                        report_path,
                        elapsed,
                        final_properties: properties.snapshot(),
                    };
                    match &report.outcome {
                        Ok(()) => tracing::info!(run_id, elapsed = ?elapsed, "run finished"),
                        Err(fault) => tracing::warn!(run_id, error = %fault, "run failed"),
                    }

                    {
                        let mut active = lock(&shared.active);
                        if active.as_ref().is_some_and(|a| a.context == context) {
                            *active = None;
                        }
                    }
                    shared.display.finish();
                    shared.guard.fetch_sub(1, Ordering::AcqRel);

                    if let Some(callback) = on_complete {
                        callback(&report);
                    }
                    let _ = tx.send(report);
                })
        };

        if let Err(source) = monitor {
            // The worker keeps running unobserved; ask it to wind down.
            signals.request_stop();
            self.abandon(context);
            return Err(RunError::Thread {
                role: "monitor",
                source,
            });
        }

        Ok(RunHandle { run_id, reports })
    }

    fn abandon(&self, context: ContextId) {
        *lock(&self.shared.active) = None;
        if let Err(e) = lock(&self.arena).dispose(context) {
            tracing::warn!(context = %context, error = %e, "failed to dispose run context");
        }
        self.shared.display.set(VcrState::Stopped);
    }

    fn discard_prepared(&mut self) {
        if let Some(prepared) = self.prepared.take() {
            if let Err(e) = lock(&self.arena).dispose(prepared.context) {
                tracing::debug!(context = %prepared.context, error = %e, "discarding prepared run");
            }
        }
    }
}

impl Drop for RunController {
    fn drop(&mut self) {
        self.discard_prepared();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
