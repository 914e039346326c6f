//! Output sink for model output.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Where model output lines go.
///
/// Cheap to clone. [`OutputSink::session`] hands out a handle that shares
/// the writer but can be released on its own, so stopping one run does not
/// close the sink for the next.
#[derive(Clone)]
pub struct OutputSink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    open: Arc<AtomicBool>,
}

impl OutputSink {
    /// Sink writing to `writer`.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Sink writing to the process's stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Sink discarding everything.
    pub fn null() -> Self {
        Self::new(io::sink())
    }

    /// A new handle on the same writer with its own release state.
    #[must_use]
    pub fn session(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Write one line. Dropped silently once this handle is released.
    pub fn write_line(&self, line: &str) {
        if !self.open.load(Ordering::Acquire) {
            return;
        }
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(writer, "{line}") {
            tracing::debug!(error = %e, "output sink write failed");
        }
    }

    /// Flush and stop accepting output on this handle.
    pub fn release(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = writer.flush();
        }
    }

    /// Whether this handle still accepts output.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
