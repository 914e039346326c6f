//! Cooperative control signals from the controller to a running artifact.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A control request delivered to a running artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Halt as soon as possible.
    Stop,
    /// Turn single-step mode on or off.
    SingleStep(bool),
    /// Advance one event.
    Step,
}

#[derive(Default)]
struct State {
    queue: VecDeque<Signal>,
    stop_requested: bool,
    single_step: bool,
    finished: bool,
}

/// Signal channel shared between the controller and one run.
///
/// Stopping is cooperative: the artifact observes the request and winds
/// down; nothing is killed. Once [`RunSignals::finish`] is called the
/// channel is closed and waiters return `None`.
#[derive(Default)]
pub struct RunSignals {
    state: Mutex<State>,
    cond: Condvar,
}

impl RunSignals {
    /// A fresh, open channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the artifact to halt. Idempotent.
    pub fn request_stop(&self) {
        let mut state = self.lock();
        if state.stop_requested || state.finished {
            return;
        }
        state.stop_requested = true;
        state.queue.push_back(Signal::Stop);
        self.cond.notify_all();
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    /// Turn single-step mode on or off.
    pub fn set_single_step(&self, on: bool) {
        let mut state = self.lock();
        if state.finished || state.single_step == on {
            return;
        }
        state.single_step = on;
        state.queue.push_back(Signal::SingleStep(on));
        self.cond.notify_all();
    }

    /// Whether single-step mode is on.
    pub fn is_single_step(&self) -> bool {
        self.lock().single_step
    }

    /// Advance one event.
    pub fn request_step(&self) {
        let mut state = self.lock();
        if state.finished {
            return;
        }
        state.queue.push_back(Signal::Step);
        self.cond.notify_all();
    }

    /// Close the channel. Pending signals are dropped.
    pub fn finish(&self) {
        let mut state = self.lock();
        state.finished = true;
        state.queue.clear();
        self.cond.notify_all();
    }

    /// Block until the next signal, or `None` once the channel is closed.
    pub fn next(&self) -> Option<Signal> {
        let mut state = self.lock();
        loop {
            if state.finished {
                return None;
            }
            if let Some(signal) = state.queue.pop_front() {
                return Some(signal);
            }
            state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`Self::next`] but gives up after `timeout`, returning `None`
    /// as well. Use [`Self::is_finished`] to tell the two apart.
    pub fn next_timeout(&self, timeout: Duration) -> Option<Signal> {
        let state = self.lock();
        let (mut state, _) = self
            .cond
            .wait_timeout_while(state, timeout, |s| !s.finished && s.queue.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        if state.finished {
            return None;
        }
        state.queue.pop_front()
    }

    /// Whether the channel has been closed.
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
