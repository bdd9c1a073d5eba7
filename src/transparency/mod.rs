//! Transparency module for the activity sensor agent.
//!
//! This module tracks what the collector has persisted and how its flush
//! rounds went, so collection can be audited.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, SharedTransparencyLog, TransparencyLog,
    TransparencyStats,
};
