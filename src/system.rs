//! System controller.
//!
//! Owns the shared control flags, the clock poller, the task registry and the
//! aggregating logger, and sequences startup, pause/resume and shutdown.
//!
//! The registry has a `"probes"` group holding every producer and a
//! `"logger"` leaf:
//!
//! ```text
//! root
//! ├── probes
//! │   ├── process
//! │   ├── window
//! │   └── ...
//! └── logger
//! ```

use crate::aggregator::{
    AggregatingLogger, JsonFileSink, RoundReport, TracingSink, LOGGER_TASK_TYPE,
};
use crate::config::{Config, ConfigError};
use crate::core::registry::{Registry, RegistryError};
use crate::core::task::{panic_message, ScheduledTask, Task, TaskEnv, TaskError};
use crate::core::worker::WorkerThread;
use crate::probes::{
    ClipboardProbe, FocusWindowProbe, KeyboardProbe, MouseProbe, Probe, ProbeTask, ProcessProbe,
};
use crate::transparency::{create_shared_log_with_persistence, SharedTransparencyLog};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Name of the registry group holding every producer.
pub const PROBES_GROUP: &str = "probes";

/// Errors raised while building or starting the system.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to spawn clock poller: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("an aggregating logger must be provided")]
    MissingLogger,
    #[error("system was already started")]
    AlreadyStarted,
    #[error("system was shut down")]
    ShutDown,
}

/// What happened during shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Outcome of the final forced logger round
    pub final_round: Result<RoundReport, String>,
    /// Tasks still running after their join timeout
    pub timed_out: Vec<String>,
    /// Whether the clock poller stopped in time
    pub clock_stopped: bool,
}

impl ShutdownReport {
    /// Everything was persisted and every thread stopped.
    pub fn is_clean(&self) -> bool {
        self.final_round.is_ok() && self.timed_out.is_empty() && self.clock_stopped
    }
}

/// Builds a [`System`].
pub struct SystemBuilder {
    source_id: String,
    env: TaskEnv,
    tasks: Vec<(String, Arc<dyn Task>)>,
    logger: Option<AggregatingLogger>,
    join_timeout: Duration,
    start_paused: bool,
}

impl SystemBuilder {
    /// Start a builder whose probes stamp records with `source_id`.
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            env: TaskEnv::default(),
            tasks: Vec::new(),
            logger: None,
            join_timeout: Duration::from_secs(1),
            start_paused: false,
        }
    }

    /// Add a probe, registered under its task type.
    pub fn probe<P: Probe>(self, probe: P) -> Result<Self, SystemError> {
        let name = probe.task_type().to_string();
        let task = ProbeTask::new(self.source_id.clone(), probe)?;
        Ok(self.task(name, Arc::new(task)))
    }

    /// Add an arbitrary task to the probes group.
    pub fn task(mut self, name: impl Into<String>, task: Arc<dyn Task>) -> Self {
        self.tasks.push((name.into(), task));
        self
    }

    pub fn logger(mut self, logger: AggregatingLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// How long shutdown waits for each thread.
    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Statistics shared by every task and the logger.
    pub fn stats(mut self, stats: SharedTransparencyLog) -> Self {
        self.env.stats = stats;
        self
    }

    /// Leave the system paused after [`System::start`].
    pub fn start_paused(mut self, paused: bool) -> Self {
        self.start_paused = paused;
        self
    }

    pub fn build(self) -> Result<System, SystemError> {
        let logger = Arc::new(
            self.logger
                .ok_or(SystemError::MissingLogger)?
                .with_stats(Arc::clone(&self.env.stats)),
        );

        let mut probes = Registry::builder();
        for (name, task) in self.tasks {
            let scheduled = ScheduledTask::new(name.clone(), task, self.env.clone())?;
            probes = probes.task(name, Arc::new(scheduled))?;
        }

        let logger_task = ScheduledTask::new(
            LOGGER_TASK_TYPE,
            Arc::clone(&logger) as Arc<dyn Task>,
            self.env.clone(),
        )?;

        let registry = Registry::builder()
            .group(PROBES_GROUP, probes.build())?
            .task(LOGGER_TASK_TYPE, Arc::new(logger_task))?
            .build();

        Ok(System {
            instance_id: Uuid::new_v4(),
            env: self.env,
            registry: Arc::new(registry),
            logger,
            join_timeout: self.join_timeout,
            start_paused: self.start_paused,
            state: Mutex::new(Lifecycle::Built),
        })
    }
}

enum Lifecycle {
    Built,
    Running { clock: WorkerThread },
    Stopped(ShutdownReport),
}

/// A running collector.
pub struct System {
    instance_id: Uuid,
    env: TaskEnv,
    registry: Arc<Registry>,
    logger: Arc<AggregatingLogger>,
    join_timeout: Duration,
    start_paused: bool,
    state: Mutex<Lifecycle>,
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("instance_id", &self.instance_id)
            .field("tasks", &self.registry.len())
            .field("paused", &self.is_paused())
            .finish()
    }
}

impl System {
    pub fn builder(source_id: impl Into<String>) -> SystemBuilder {
        SystemBuilder::new(source_id)
    }

    /// Build the collector described by `config`: every enabled built-in
    /// probe, a logger persisting to `config.log_path` and statistics kept
    /// under the data directory.
    pub fn from_config(config: &Config) -> Result<Self, SystemError> {
        config.validate()?;

        let sink = JsonFileSink::new(&config.log_path, config.write_mode);
        let logger =
            AggregatingLogger::new(config.logger_interval, config.flush_mode, Box::new(sink))
                .with_observer(Box::new(TracingSink));

        let probes = &config.probes;
        let mut builder = SystemBuilder::new(config.source_id.clone())
            .logger(logger)
            .join_timeout(config.join_timeout)
            .stats(create_shared_log_with_persistence(config.stats_path()))
            .start_paused(config.paused);

        if probes.process.enabled {
            builder = builder.probe(ProcessProbe::new(probes.process.interval))?;
        }
        if probes.window.enabled {
            builder = builder.probe(FocusWindowProbe::new(probes.window.interval))?;
        }
        if probes.mouse.enabled {
            builder = builder.probe(MouseProbe::new(probes.mouse.interval))?;
        }
        if probes.keyboard.enabled {
            builder = builder.probe(KeyboardProbe::new(probes.keyboard.interval))?;
        }
        if probes.clipboard.enabled {
            builder = builder.probe(ClipboardProbe::new(probes.clipboard.interval))?;
        }

        builder.build()
    }

    /// Unique id of this collector instance.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Spawn the clock poller and every task, then activate them unless
    /// the system was built paused.
    pub fn start(&self) -> Result<(), SystemError> {
        let mut state = self.state.lock();
        match *state {
            Lifecycle::Built => {}
            Lifecycle::Running { .. } => return Err(SystemError::AlreadyStarted),
            Lifecycle::Stopped(_) => return Err(SystemError::ShutDown),
        }

        let clock = self.env.clock.spawn_poller(self.env.flags.clone())?;
        *state = Lifecycle::Running { clock };

        if let Err(e) = self.registry.start_all() {
            error!(error = %e, "failed to start tasks");
            return Err(e.into());
        }

        if !self.start_paused {
            self.env.flags.activate();
        }

        info!(
            instance = %self.instance_id,
            tasks = self.registry.len(),
            paused = self.start_paused,
            "collector started"
        );
        Ok(())
    }

    /// Hold every task at its next activity gate and freeze the clock.
    pub fn pause(&self) {
        if !self.is_paused() {
            self.env.flags.pause();
            info!("collection paused");
        }
    }

    pub fn resume(&self) {
        if self.is_paused() && !self.env.flags.is_ending() {
            self.env.flags.activate();
            info!("collection resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        !self.env.flags.is_active()
    }

    /// Active (unpaused) time since the system was started.
    pub fn elapsed(&self) -> Duration {
        self.env.clock.now()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn logger(&self) -> &Arc<AggregatingLogger> {
        &self.logger
    }

    pub fn stats(&self) -> &SharedTransparencyLog {
        &self.env.stats
    }

    /// Stop every task and persist everything still buffered.
    ///
    /// Producers are joined before the final round, which drains every
    /// producer regardless of votes. Join timeouts are reported, not fatal.
    /// Calling this again returns the first report.
    pub fn shutdown(&self) -> ShutdownReport {
        let mut state = self.state.lock();
        let clock = match std::mem::replace(&mut *state, Lifecycle::Built) {
            Lifecycle::Stopped(report) => {
                *state = Lifecycle::Stopped(report.clone());
                return report;
            }
            Lifecycle::Running { clock } => Some(clock),
            Lifecycle::Built => None,
        };

        info!(instance = %self.instance_id, "shutting down");
        self.env.flags.terminate();
        self.registry.trigger_all();

        let mut timed_out = match self.registry.group(PROBES_GROUP) {
            Some(probes) => probes.join_all(self.join_timeout),
            None => Vec::new(),
        };
        if let Some(logger) = self.registry.task(LOGGER_TASK_TYPE) {
            if !logger.join(self.join_timeout) {
                warn!(task = logger.identifier(), "task did not stop in time");
                timed_out.push(logger.identifier().to_string());
            }
        }

        let final_round = match panic::catch_unwind(AssertUnwindSafe(|| {
            self.logger.final_flush(&self.registry)
        })) {
            Ok(Ok(round)) => Ok(round),
            Ok(Err(e)) => {
                error!(error = %e, pending = self.logger.pending(), "final flush failed");
                Err(e.to_string())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "final flush panicked");
                Err(format!("final flush panicked: {message}"))
            }
        };

        let clock_stopped = match clock {
            Some(mut clock) => clock.join(self.join_timeout),
            None => true,
        };
        if !clock_stopped {
            warn!("clock poller did not stop in time");
        }

        if let Err(e) = self.env.stats.save() {
            warn!(error = %e, "failed to save transparency stats");
        }

        let report = ShutdownReport {
            final_round,
            timed_out,
            clock_stopped,
        };
        info!(clean = report.is_clean(), "collector stopped");
        *state = Lifecycle::Stopped(report.clone());
        report
    }
}

impl Drop for System {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{FlushMode, MemorySink};
    use crate::core::buffer::{FlushVote, Producer};
    use crate::core::record::Record;
    use crate::core::task::TaskContext;

    struct Idle;

    impl Task for Idle {
        fn task_type(&self) -> &str {
            "idle"
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(60)
        }

        fn perform_work(&self, _ctx: &TaskContext<'_>) -> Result<(), TaskError> {
            Ok(())
        }
    }

    /// A producer whose drain always panics.
    struct BrokenDrain;

    impl Producer for BrokenDrain {
        fn vote(&self) -> FlushVote {
            FlushVote::Skip
        }

        fn drain(&self) -> Vec<Record> {
            panic!("buffer corrupted");
        }

        fn pending(&self) -> usize {
            0
        }
    }

    impl Task for BrokenDrain {
        fn task_type(&self) -> &str {
            "broken"
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(60)
        }

        fn perform_work(&self, _ctx: &TaskContext<'_>) -> Result<(), TaskError> {
            Ok(())
        }

        fn producer(&self) -> Option<&dyn Producer> {
            Some(self)
        }
    }

    fn logger(sink: &MemorySink) -> AggregatingLogger {
        AggregatingLogger::new(
            Duration::from_secs(60),
            FlushMode::Quorum,
            Box::new(sink.clone()),
        )
    }

    #[test]
    fn test_registry_layout() {
        let sink = MemorySink::new();
        let system = System::builder("1000")
            .task("idle", Arc::new(Idle))
            .logger(logger(&sink))
            .build()
            .unwrap();

        assert!(system.registry().task("probes/idle").is_some());
        assert!(system.registry().task("logger").is_some());
        assert_eq!(system.registry().len(), 2);
    }

    #[test]
    fn test_logger_is_required() {
        let result = System::builder("1000").task("idle", Arc::new(Idle)).build();
        assert!(matches!(result, Err(SystemError::MissingLogger)));
    }

    #[test]
    fn test_duplicate_probe_is_rejected() {
        let result = System::builder("1000")
            .task("idle", Arc::new(Idle))
            .task("idle", Arc::new(Idle))
            .logger(logger(&MemorySink::new()))
            .build();
        assert!(matches!(
            result,
            Err(SystemError::Registry(RegistryError::DuplicateName(_)))
        ));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let system = System::builder("1000")
            .task("idle", Arc::new(Idle))
            .logger(logger(&MemorySink::new()))
            .join_timeout(Duration::from_secs(2))
            .build()
            .unwrap();

        system.start().unwrap();
        assert!(matches!(system.start(), Err(SystemError::AlreadyStarted)));

        let first = system.shutdown();
        assert!(first.is_clean());
        assert_eq!(first.final_round, Ok(RoundReport::Idle));
        assert_eq!(system.shutdown(), first);
        assert!(matches!(system.start(), Err(SystemError::ShutDown)));
    }

    #[test]
    fn test_panicking_drain_is_reported_not_raised() {
        let sink = MemorySink::new();
        let system = System::builder("1000")
            .task("broken", Arc::new(BrokenDrain))
            .logger(logger(&sink))
            .build()
            .unwrap();

        system.start().unwrap();
        let report = system.shutdown();

        let error = report.final_round.unwrap_err();
        assert!(error.contains("buffer corrupted"), "{error}");
        assert!(report.timed_out.is_empty());
        assert_eq!(sink.batch_count(), 0);

        // Dropping after a failed final round must not panic either.
        drop(system);
    }

    #[test]
    fn test_start_paused_keeps_clock_frozen() {
        let system = System::builder("1000")
            .task("idle", Arc::new(Idle))
            .logger(logger(&MemorySink::new()))
            .start_paused(true)
            .build()
            .unwrap();

        system.start().unwrap();
        assert!(system.is_paused());
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(system.elapsed(), Duration::ZERO);

        system.resume();
        assert!(!system.is_paused());
        assert!(system.shutdown().is_clean());
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let mut config = Config::default();
        config.source_id = String::new();
        assert!(matches!(
            System::from_config(&config),
            Err(SystemError::Config(ConfigError::Invalid(_)))
        ));
    }
}
