// src/sync.rs

//! Thread parking primitives for the pipeline.
//!
//! The hot path never takes these locks; they only park and wake threads once
//! the atomics say there is nothing to do.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A worker that panicked while holding one of these locks left only plain
    // flags behind, which are always valid.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Auto-reset event with a single waiter.
///
/// `set` before `wait` is not lost: the next `wait` returns immediately and
/// consumes the signal.
#[derive(Debug, Default)]
pub struct Event {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        *lock(&self.signaled) = true;
        self.cond.notify_one();
    }

    /// Block until signaled, then reset.
    pub fn wait(&self) {
        let mut signaled = lock(&self.signaled);
        while !*signaled {
            signaled = self
                .cond
                .wait(signaled)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *signaled = false;
    }
}

/// Why a worker woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// New commands may have been published.
    MoreCommands,
    /// The pipeline is shutting down.
    Stop,
}

#[derive(Debug, Default)]
struct DoorbellState {
    rung: bool,
    stopped: bool,
}

/// Per-worker wake signal: an auto-reset "more work" flag plus a sticky stop.
#[derive(Debug, Default)]
pub struct Doorbell {
    state: Mutex<DoorbellState>,
    cond: Condvar,
}

impl Doorbell {
    pub fn ring(&self) {
        lock(&self.state).rung = true;
        self.cond.notify_one();
    }

    /// Stop is permanent and wins over any pending ring.
    pub fn stop(&self) {
        lock(&self.state).stopped = true;
        self.cond.notify_one();
    }

    pub fn wait(&self) -> Wake {
        let mut state = lock(&self.state);
        loop {
            if state.stopped {
                return Wake::Stop;
            }
            if state.rung {
                state.rung = false;
                return Wake::MoreCommands;
            }
            state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }
}
