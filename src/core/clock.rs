//! Pausable virtual clock.
//!
//! The clock only advances while the shared `active` flag is set. A dedicated
//! poller samples the monotonic clock roughly every millisecond; while the
//! system is paused it just moves the sample point forward, so a resume never
//! produces a burst of overdue work.

use crate::core::signal::ControlFlags;
use crate::core::worker::WorkerThread;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Sampling period of the clock poller.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct ClockState {
    accumulated: Duration,
    last_sample: Instant,
}

/// Cumulative active time shared by every scheduled task.
///
/// Cloning yields a handle to the same clock.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    state: Arc<Mutex<ClockState>>,
}

impl VirtualClock {
    /// Create a clock reading zero.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                accumulated: Duration::ZERO,
                last_sample: Instant::now(),
            })),
        }
    }

    /// Active time accumulated since construction.
    pub fn now(&self) -> Duration {
        self.state.lock().accumulated
    }

    /// Active time in fractional seconds.
    pub fn now_secs(&self) -> f64 {
        self.now().as_secs_f64()
    }

    /// Fold the monotonic time since the previous sample into the clock.
    ///
    /// The interval only counts when `active` is true. Samples older than the
    /// previous one are ignored, so the reading never decreases.
    pub fn sample(&self, at: Instant, active: bool) {
        let mut state = self.state.lock();
        if at <= state.last_sample {
            return;
        }
        if active {
            let delta = at - state.last_sample;
            state.accumulated += delta;
        }
        state.last_sample = at;
    }

    /// Spawn the poller that drives this clock from `flags`.
    ///
    /// Only time the poller itself observes as active is counted; whatever
    /// passed since the previous sample is discarded. The poller exits once
    /// the end flag is observed.
    pub fn spawn_poller(&self, flags: ControlFlags) -> std::io::Result<WorkerThread> {
        self.sample(Instant::now(), false);
        let clock = self.clone();
        WorkerThread::spawn("virtual-clock", move || {
            debug!("clock poller started");
            while !flags.is_ending() {
                clock.sample(Instant::now(), flags.is_active());
                thread::sleep(POLL_INTERVAL);
            }
            debug!(elapsed_secs = clock.now_secs(), "clock poller stopped");
        })
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paused_intervals_are_excluded() {
        let clock = VirtualClock::new();
        let t0 = Instant::now() + Duration::from_millis(1);

        clock.sample(t0, false);
        clock.sample(t0 + Duration::from_secs(2), true);
        assert_eq!(clock.now(), Duration::from_secs(2));

        // Paused between 2s and 5s.
        clock.sample(t0 + Duration::from_secs(5), false);
        assert_eq!(clock.now(), Duration::from_secs(2));

        clock.sample(t0 + Duration::from_secs(6), true);
        assert_eq!(clock.now(), Duration::from_secs(3));
    }

    #[test]
    fn test_stale_sample_never_rewinds() {
        let clock = VirtualClock::new();
        let t0 = Instant::now() + Duration::from_millis(1);

        clock.sample(t0 + Duration::from_secs(1), true);
        let reading = clock.now();
        clock.sample(t0, true);
        assert_eq!(clock.now(), reading);
    }

    #[test]
    fn test_time_before_poller_start_is_not_counted() {
        let flags = ControlFlags::new();
        let clock = VirtualClock::new();
        thread::sleep(Duration::from_millis(300));

        flags.activate();
        let mut poller = clock.spawn_poller(flags.clone()).unwrap();
        thread::sleep(Duration::from_millis(20));
        flags.terminate();
        assert!(poller.join(Duration::from_secs(2)));

        let elapsed = clock.now();
        assert!(elapsed < Duration::from_millis(100), "elapsed {elapsed:?}");
    }

    #[test]
    fn test_poller_freezes_while_paused() {
        let flags = ControlFlags::new();
        let clock = VirtualClock::new();
        let mut poller = clock.spawn_poller(flags.clone()).unwrap();

        flags.activate();
        thread::sleep(Duration::from_millis(100));
        flags.pause();
        thread::sleep(Duration::from_millis(20));
        let paused_at = clock.now();

        thread::sleep(Duration::from_millis(200));
        let after_pause = clock.now();
        assert!(after_pause - paused_at < Duration::from_millis(10));

        flags.activate();
        thread::sleep(Duration::from_millis(100));
        flags.terminate();
        assert!(poller.join(Duration::from_secs(2)));

        let total = clock.now();
        assert!(total >= Duration::from_millis(150));
        // Roughly 220ms active; the 200ms pause must not show up.
        assert!(total < Duration::from_millis(380), "elapsed {total:?}");
    }
}
