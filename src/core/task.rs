//! Periodic tasks driven by the virtual clock.
//!
//! Each [`ScheduledTask`] runs its own control loop on a dedicated thread:
//!
//! ```text
//! Idle ──start──▶ WaitingActive ──active──▶ Running ──▶ Sleeping ─┐
//!                      ▲  │                                 │    │
//!                      │  └──end──▶ Terminated ◀──end───────┘    │
//!                      └───────── interval elapsed / trigger ────┘
//! ```
//!
//! Sleeping is measured against the shared [`VirtualClock`] from the start
//! of the previous work unit, so execution does not drift and pauses do not
//! count towards the interval.

use crate::aggregator::SinkError;
use crate::core::buffer::Producer;
use crate::core::clock::VirtualClock;
use crate::core::registry::Registry;
use crate::core::signal::{ControlFlags, Flag};
use crate::core::worker::WorkerThread;
use crate::transparency::SharedTransparencyLog;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Upper bound on a single wait while sleeping; bounds shutdown latency
/// even when nobody triggers the task.
pub const END_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Errors raised by tasks and the scheduler.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A work unit failed
    #[error("{0}")]
    Failed(String),
    /// A work unit panicked
    #[error("work unit panicked: {0}")]
    Panicked(String),
    /// A task was constructed without a required value
    #[error("invalid task configuration: {0}")]
    Contract(String),
    #[error("task {0} was already started")]
    AlreadyStarted(String),
    #[error("failed to spawn task thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }
}

/// Shared state handed to every task at construction.
#[derive(Debug, Clone, Default)]
pub struct TaskEnv {
    pub flags: ControlFlags,
    pub clock: VirtualClock,
    pub stats: SharedTransparencyLog,
}

/// What a work unit can see while it runs.
pub struct TaskContext<'a> {
    identifier: &'a str,
    env: &'a TaskEnv,
    registry: &'a Registry,
}

impl<'a> TaskContext<'a> {
    pub fn new(identifier: &'a str, env: &'a TaskEnv, registry: &'a Registry) -> Self {
        Self {
            identifier,
            env,
            registry,
        }
    }

    /// Identifier of the running task.
    pub fn identifier(&self) -> &str {
        self.identifier
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.env.clock
    }

    pub fn flags(&self) -> &ControlFlags {
        &self.env.flags
    }

    pub fn stats(&self) -> &SharedTransparencyLog {
        &self.env.stats
    }

    /// Wake every task of `task_type` so it runs without waiting out its
    /// interval. Returns how many tasks were triggered.
    pub fn trigger(&self, task_type: &str) -> usize {
        self.registry.trigger_type(task_type)
    }
}

/// A unit of periodic work.
pub trait Task: Send + Sync + 'static {
    /// Stable category identifier (e.g. `"mouse"`).
    fn task_type(&self) -> &str;

    /// Time between the starts of consecutive work units.
    fn interval(&self) -> Duration;

    /// Perform one unit of work.
    fn perform_work(&self, ctx: &TaskContext<'_>) -> Result<(), TaskError>;

    /// Called after a failed or panicked work unit; the loop then continues.
    fn handle_failure(&self, ctx: &TaskContext<'_>, error: &TaskError) {
        warn!(task = ctx.identifier(), %error, "work unit failed");
    }

    /// The buffer-draining side of this task, if it produces records.
    fn producer(&self) -> Option<&dyn Producer> {
        None
    }
}

/// A [`Task`] bound to its own thread, wake signal and shared state.
pub struct ScheduledTask {
    identifier: String,
    interval: Duration,
    task: Arc<dyn Task>,
    env: TaskEnv,
    wake: Flag,
    worker: Mutex<Option<WorkerThread>>,
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("identifier", &self.identifier)
            .field("task_type", &self.task.task_type())
            .field("interval", &self.interval)
            .finish()
    }
}

impl ScheduledTask {
    /// Bind `task` to the shared environment.
    ///
    /// Fails if the identifier or task type is empty, or the interval is zero.
    pub fn new(
        identifier: impl Into<String>,
        task: Arc<dyn Task>,
        env: TaskEnv,
    ) -> Result<Self, TaskError> {
        let identifier = identifier.into();
        if identifier.trim().is_empty() {
            return Err(TaskError::Contract("identifier must be provided".into()));
        }
        if task.task_type().trim().is_empty() {
            return Err(TaskError::Contract(format!(
                "{identifier}: task type must be provided"
            )));
        }

        let interval = task.interval();
        if interval.is_zero() {
            return Err(TaskError::Contract(format!(
                "{identifier}: interval must be greater than zero"
            )));
        }

        Ok(Self {
            identifier,
            interval,
            task,
            env,
            wake: Flag::new(false),
            worker: Mutex::new(None),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn task_type(&self) -> &str {
        self.task.task_type()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn task(&self) -> &Arc<dyn Task> {
        &self.task
    }

    pub fn producer(&self) -> Option<&dyn Producer> {
        self.task.producer()
    }

    /// Start the control loop on its own thread.
    pub fn start(self: &Arc<Self>, registry: Arc<Registry>) -> Result<(), TaskError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(TaskError::AlreadyStarted(self.identifier.clone()));
        }

        let this = Arc::clone(self);
        let thread_name = format!("task-{}", self.identifier);
        *worker = Some(WorkerThread::spawn(thread_name, move || {
            this.run(&registry)
        })?);
        Ok(())
    }

    /// Ask a sleeping task to run immediately.
    ///
    /// Idempotent. A trigger that arrives while the work unit is running is
    /// discarded when the task enters its next sleep.
    pub fn trigger(&self) {
        self.wake.set();
    }

    /// Check whether a trigger is waiting to be observed.
    pub fn is_triggered(&self) -> bool {
        self.wake.is_set()
    }

    /// Wait up to `timeout` for the loop to exit.
    ///
    /// Returns `true` if the loop has exited (or never started).
    pub fn join(&self, timeout: Duration) -> bool {
        match self.worker.lock().as_mut() {
            Some(worker) => worker.join(timeout),
            None => true,
        }
    }

    /// Check whether the loop thread is alive.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    fn run(&self, registry: &Registry) {
        info!(
            task = %self.identifier,
            interval_secs = self.interval.as_secs_f64(),
            "task started"
        );
        let ctx = TaskContext::new(&self.identifier, &self.env, registry);

        while self.env.flags.wait_active() {
            let started = self.env.clock.now();
            self.run_once(&ctx);

            if !self.dynamic_sleep(started) {
                break;
            }
        }

        debug!(task = %self.identifier, "task stopped");
    }

    fn run_once(&self, ctx: &TaskContext<'_>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.task.perform_work(ctx)))
            .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload.as_ref()))));

        if let Err(error) = outcome {
            self.env.stats.record_work_failure();
            self.task.handle_failure(ctx, &error);
        }
    }

    /// Sleep until `interval` of virtual time has passed since `started`, a
    /// trigger arrives, or termination is requested.
    ///
    /// Returns `false` on termination.
    fn dynamic_sleep(&self, started: Duration) -> bool {
        self.wake.clear();

        loop {
            if self.env.flags.is_ending() {
                return false;
            }

            let elapsed = self.env.clock.now().saturating_sub(started);
            let remaining = self.interval.saturating_sub(elapsed);

            if self.wake.wait_and_clear(remaining.min(END_POLL_INTERVAL)) {
                return true;
            }
            if remaining.is_zero() {
                return true;
            }
        }
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        interval: Duration,
    }

    impl Task for Fixed {
        fn task_type(&self) -> &str {
            "fixed"
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        fn perform_work(&self, _ctx: &TaskContext<'_>) -> Result<(), TaskError> {
            Ok(())
        }
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let task = Arc::new(Fixed {
            interval: Duration::ZERO,
        });
        let err = ScheduledTask::new("fixed", task, TaskEnv::default()).unwrap_err();
        assert!(matches!(err, TaskError::Contract(_)));
    }

    #[test]
    fn test_empty_identifier_is_rejected() {
        let task = Arc::new(Fixed {
            interval: Duration::from_secs(1),
        });
        let err = ScheduledTask::new("  ", task, TaskEnv::default()).unwrap_err();
        assert!(matches!(err, TaskError::Contract(_)));
    }

    #[test]
    fn test_start_twice_fails() {
        let task = Arc::new(Fixed {
            interval: Duration::from_secs(1),
        });
        let env = TaskEnv::default();
        let scheduled = Arc::new(ScheduledTask::new("fixed", task, env.clone()).unwrap());
        let registry = Arc::new(Registry::default());

        scheduled.start(Arc::clone(&registry)).unwrap();
        assert!(matches!(
            scheduled.start(registry),
            Err(TaskError::AlreadyStarted(_))
        ));

        env.flags.terminate();
        scheduled.trigger();
        assert!(scheduled.join(Duration::from_secs(2)));
        assert!(!scheduled.is_running());
    }

    #[test]
    fn test_unstarted_task_joins_immediately() {
        let task = Arc::new(Fixed {
            interval: Duration::from_secs(1),
        });
        let scheduled = ScheduledTask::new("fixed", task, TaskEnv::default()).unwrap();
        assert!(scheduled.join(Duration::ZERO));
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
