//! Console output levels and log initialization.
//!
//! Three output levels controlled by CLI flags:
//! - **Quiet** (`-q`): errors and the final summary only
//! - **Default** (no flag): "Compiling" and "Running" lines, errors, summary
//! - **Verbose** (`-v`): cache decisions, timings and model properties
//!
//! Library crates log through `tracing`; [`init_tracing`] maps the same
//! level onto a stderr subscriber unless `SIMFORGE_LOG` says otherwise.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use tracing_subscriber::EnvFilter;

/// Environment variable holding a `tracing` filter directive.
pub const LOG_ENV: &str = "SIMFORGE_LOG";

/// Output verbosity level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet = 0,
    Default = 1,
    Verbose = 2,
}

impl Verbosity {
    fn from_flags(quiet: bool, verbose: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Default
        }
    }

    /// Filter used when `SIMFORGE_LOG` is unset.
    fn default_filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Default => "warn",
            Verbosity::Verbose => "info,simforge_cache=debug,simforge_compile=debug",
        }
    }
}

static VERBOSITY: AtomicU8 = AtomicU8::new(Verbosity::Default as u8);

/// Initialize the verbosity level for the current process.
pub fn init(quiet: bool, verbose: bool) {
    VERBOSITY.store(Verbosity::from_flags(quiet, verbose) as u8, Ordering::Relaxed);
}

/// Install the stderr log subscriber. Call after [`init`].
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(verbosity().default_filter()));
    // A second init (tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Returns the current verbosity level.
pub fn verbosity() -> Verbosity {
    match VERBOSITY.load(Ordering::Relaxed) {
        0 => Verbosity::Quiet,
        2 => Verbosity::Verbose,
        _ => Verbosity::Default,
    }
}

/// Returns `true` if verbose mode is active.
pub fn is_verbose() -> bool {
    verbosity() == Verbosity::Verbose
}

/// Returns `true` if quiet mode is active.
pub fn is_quiet() -> bool {
    verbosity() == Verbosity::Quiet
}

/// Print a message only when verbose mode is enabled.
macro_rules! vprintln {
    ($($arg:tt)*) => {
        if $crate::verbose::is_verbose() {
            println!($($arg)*);
        }
    };
}

pub(crate) use vprintln;

/// Print a message at default verbosity and above.
///
/// ```ignore
/// dprintln!("  Compiling {}...", name);
/// ```
macro_rules! dprintln {
    ($($arg:tt)*) => {
        if !$crate::verbose::is_quiet() {
            println!($($arg)*);
        }
    };
}

pub(crate) use dprintln;

/// Prints the elapsed time of a labeled step on drop, in verbose mode.
pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    /// Begin timing a labeled operation.
    pub fn start(label: &'static str) -> Self {
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if is_verbose() {
            println!("  {}: {:.1?}", self.label, self.start.elapsed());
        }
    }
}
