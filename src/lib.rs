//! Activity Sensor Agent - host-activity telemetry collector.
//!
//! A set of periodic probes (process, focus window, mouse, keyboard,
//! clipboard) append timestamped records to private buffers; an aggregating
//! logger periodically drains the buffers under a flush protocol, orders the
//! merged records by time and persists them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Activity Sensor Agent                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   trigger   ┌─────────────┐               │
//! │  │ Mouse/Kbd   │────────────▶│Window/Process│               │
//! │  │   probes    │             │   probes    │               │
//! │  └─────────────┘             └─────────────┘               │
//! │         │  buffer                   │  buffer               │
//! │         ▼                           ▼                       │
//! │  ┌─────────────────────────────────────────┐               │
//! │  │   Aggregating logger (vote → drain →    │──▶ JSON log   │
//! │  │   sort → persist → clear)               │──▶ tracing    │
//! │  └─────────────────────────────────────────┘               │
//! │         ▲                                                   │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │  Virtual    │   │  Control    │   │Transparency │       │
//! │  │   clock     │   │   flags     │   │    Log      │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every task measures its interval against the shared virtual clock, which
//! stops while the system is paused.
//!
//! # Example
//!
//! ```no_run
//! use activity_sensor_agent::{Config, System};
//!
//! let config = Config::default();
//! let system = System::from_config(&config).expect("invalid configuration");
//! system.start().expect("failed to start");
//!
//! std::thread::sleep(std::time::Duration::from_secs(30));
//! let report = system.shutdown();
//! println!("clean shutdown: {}", report.is_clean());
//! ```

pub mod aggregator;
pub mod config;
pub mod core;
pub mod probes;
pub mod system;
pub mod telemetry;
pub mod transparency;

// Re-export key types at crate root for convenience
pub use aggregator::{
    AggregatingLogger, BatchSink, FlushMode, JsonFileSink, MemorySink, RoundReport, SinkError,
    TracingSink, WriteMode,
};
pub use config::{Config, ConfigError, ProbeConfig, ProbeSettings};
pub use core::{
    ControlFlags, FlushVote, Producer, Record, Registry, ScheduledTask, Task, TaskContext,
    TaskEnv, TaskError, VirtualClock,
};
pub use probes::{Probe, ProbeContext, ProbeTask};
pub use system::{ShutdownReport, System, SystemBuilder, SystemError};
pub use telemetry::init_tracing;
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
