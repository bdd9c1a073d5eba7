//! Shared, blocking-aware flags.
//!
//! Every task receives the process-wide `active` and `end` flags at
//! construction through [`ControlFlags`]; each task also owns a private
//! wake [`Flag`] used by triggers.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A level-triggered boolean that threads can block on.
#[derive(Debug, Default)]
pub struct Flag {
    state: Mutex<bool>,
    changed: Condvar,
}

impl Flag {
    /// Create a flag with the given initial state.
    pub fn new(initial: bool) -> Self {
        Self {
            state: Mutex::new(initial),
            changed: Condvar::new(),
        }
    }

    /// Check whether the flag is currently set.
    pub fn is_set(&self) -> bool {
        *self.state.lock()
    }

    /// Set the flag and wake every waiter.
    pub fn set(&self) {
        let mut state = self.state.lock();
        *state = true;
        self.changed.notify_all();
    }

    /// Clear the flag.
    pub fn clear(&self) {
        *self.state.lock() = false;
    }

    /// Block until the flag is set.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        while !*state {
            self.changed.wait(&mut state);
        }
    }

    /// Block until the flag is set or `timeout` elapses.
    ///
    /// Returns whether the flag was set.
    pub fn wait_until_set(&self, timeout: Duration) -> bool {
        self.wait_inner(timeout, false)
    }

    /// Like [`Flag::wait_until_set`], but clears the flag when it is observed.
    pub fn wait_and_clear(&self, timeout: Duration) -> bool {
        self.wait_inner(timeout, true)
    }

    fn wait_inner(&self, timeout: Duration, consume: bool) -> bool {
        let mut state = self.state.lock();

        match Instant::now().checked_add(timeout) {
            Some(deadline) => {
                while !*state {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
            }
            None => {
                while !*state {
                    self.changed.wait(&mut state);
                }
            }
        }

        let observed = *state;
        if observed && consume {
            *state = false;
        }
        observed
    }
}

/// The process-wide `active` and `end` flags.
///
/// Cloning is cheap and yields a handle to the same pair. Only the top-level
/// controller should call [`ControlFlags::activate`], [`ControlFlags::pause`]
/// or [`ControlFlags::terminate`]; tasks only read.
#[derive(Debug, Clone, Default)]
pub struct ControlFlags {
    active: Arc<Flag>,
    end: Arc<Flag>,
}

impl ControlFlags {
    /// Create a new pair, inactive and not ending.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_set()
    }

    pub fn is_ending(&self) -> bool {
        self.end.is_set()
    }

    /// Allow tasks to run.
    pub fn activate(&self) {
        self.active.set();
    }

    /// Hold every task at its next "wait for active" gate.
    ///
    /// Has no effect once termination was requested, so that waiting tasks
    /// stay released.
    pub fn pause(&self) {
        if !self.end.is_set() {
            self.active.clear();
        }
    }

    /// Request termination.
    ///
    /// Also sets `active` so that tasks blocked on the activity gate observe
    /// the end condition promptly.
    pub fn terminate(&self) {
        self.end.set();
        self.active.set();
    }

    /// Block until the system is active (or terminating).
    ///
    /// Returns `false` when termination was requested.
    pub fn wait_active(&self) -> bool {
        self.active.wait();
        !self.end.is_set()
    }

    /// Block until the end flag is set or `timeout` elapses.
    pub fn wait_end(&self, timeout: Duration) -> bool {
        self.end.wait_until_set(timeout)
    }
}
