//! Named OS threads with a bounded join.

use crate::core::signal::Flag;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::warn;

/// A spawned thread that can be joined with a timeout.
///
/// The completion flag is raised when the thread body returns or unwinds, so
/// a timed-out join can simply leave the thread detached.
pub struct WorkerThread {
    name: String,
    handle: Option<JoinHandle<()>>,
    finished: Arc<Flag>,
}

impl std::fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerThread")
            .field("name", &self.name)
            .field("finished", &self.finished.is_set())
            .finish()
    }
}

impl WorkerThread {
    /// Spawn `body` on a new thread called `name`.
    pub fn spawn<F>(name: impl Into<String>, body: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let finished = Arc::new(Flag::new(false));
        let done = Arc::clone(&finished);

        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let _guard = FinishGuard(done);
            body();
        })?;

        Ok(Self {
            name,
            handle: Some(handle),
            finished,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check whether the thread body has returned.
    pub fn is_finished(&self) -> bool {
        self.finished.is_set()
    }

    /// Wait up to `timeout` for the thread to exit.
    ///
    /// Returns `false` if the thread is still running when the timeout
    /// elapses; it can be joined again later.
    pub fn join(&mut self, timeout: Duration) -> bool {
        if !self.finished.wait_until_set(timeout) {
            return false;
        }

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(thread = %self.name, "worker thread panicked");
            }
        }
        true
    }
}

struct FinishGuard(Arc<Flag>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.set();
    }
}
