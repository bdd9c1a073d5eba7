//! Scheduling and synchronization core shared by every probe and the
//! aggregator.
//!
//! This module contains:
//! - Shared control flags and per-task wake signals
//! - The pausable virtual clock
//! - The periodic task loop and task registry
//! - Activity records and per-producer buffers

pub mod buffer;
pub mod clock;
pub mod record;
pub mod registry;
pub mod signal;
pub mod task;
pub mod worker;

// Re-export commonly used types
pub use buffer::{FlushVote, LogBuffer, Producer};
pub use clock::VirtualClock;
pub use record::{payload_from, sort_by_timestamp, Record, TIMESTAMP_FORMAT};
pub use registry::{Registry, RegistryBuilder, RegistryError, RegistryNode};
pub use signal::{ControlFlags, Flag};
pub use task::{ScheduledTask, Task, TaskContext, TaskEnv, TaskError};
pub use worker::WorkerThread;
