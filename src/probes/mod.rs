//! Activity probes.
//!
//! A probe only has to say what it is, how often it runs and how to take one
//! sample; [`ProbeTask`] turns it into a scheduled, buffered producer that
//! the aggregating logger can poll and drain.

pub mod simulated;
pub mod types;

pub use simulated::{ClipboardProbe, FocusWindowProbe, KeyboardProbe, MouseProbe, ProcessProbe};
pub use types::{
    ClipboardSample, KeyboardSample, MouseButton, MouseSample, ProcessSample, WindowSample,
};

use crate::core::buffer::{FlushVote, LogBuffer, Producer};
use crate::core::record::{payload_from, Record};
use crate::core::task::{Task, TaskContext, TaskError};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

/// The capability every probe implements.
pub trait Probe: Send + Sync + 'static {
    /// Stable identifier of the probe kind, stamped on every record.
    fn task_type(&self) -> &'static str;

    /// Time between samples.
    fn interval(&self) -> Duration;

    /// Take one sample, emitting zero or more records through `ctx`.
    fn sample(&self, ctx: &ProbeContext<'_>) -> Result<(), TaskError>;

    /// Vote in a flush round, given how many records are buffered.
    fn vote(&self, pending: usize) -> FlushVote {
        FlushVote::for_pending(pending)
    }
}

/// What a probe can do while sampling.
pub struct ProbeContext<'a> {
    task: &'a TaskContext<'a>,
    buffer: &'a LogBuffer,
    source_id: &'a str,
    task_type: &'static str,
}

impl<'a> ProbeContext<'a> {
    /// Buffer a record with `payload`, stamped with the current time.
    pub fn emit<T: Serialize>(&self, payload: &T) -> Result<(), TaskError> {
        let payload = payload_from(payload)?;
        self.buffer
            .push(Record::new(self.source_id, self.task_type, payload));
        Ok(())
    }

    /// Wake every task of `task_type`; returns how many were triggered.
    pub fn trigger(&self, task_type: &str) -> usize {
        self.task.trigger(task_type)
    }

    pub fn source_id(&self) -> &str {
        self.source_id
    }

    /// Virtual time of the running system.
    pub fn elapsed(&self) -> Duration {
        self.task.clock().now()
    }
}

/// Adapts a [`Probe`] into a buffered [`Task`].
pub struct ProbeTask<P> {
    probe: P,
    source_id: String,
    buffer: LogBuffer,
}

impl<P: Probe> ProbeTask<P> {
    /// Wrap `probe`, stamping its records with `source_id`.
    pub fn new(source_id: impl Into<String>, probe: P) -> Result<Self, TaskError> {
        let source_id = source_id.into();
        if source_id.trim().is_empty() {
            return Err(TaskError::Contract(format!(
                "{}: source id must be provided",
                probe.task_type()
            )));
        }

        Ok(Self {
            probe,
            source_id,
            buffer: LogBuffer::new(),
        })
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn buffer(&self) -> &LogBuffer {
        &self.buffer
    }
}

impl<P: Probe> Task for ProbeTask<P> {
    fn task_type(&self) -> &str {
        self.probe.task_type()
    }

    fn interval(&self) -> Duration {
        self.probe.interval()
    }

    fn perform_work(&self, ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        let probe_ctx = ProbeContext {
            task: ctx,
            buffer: &self.buffer,
            source_id: &self.source_id,
            task_type: self.probe.task_type(),
        };
        self.probe.sample(&probe_ctx)
    }

    fn handle_failure(&self, ctx: &TaskContext<'_>, error: &TaskError) {
        warn!(task = ctx.identifier(), %error, "probe sample failed");

        let details = json!({
            "event": {"type": "system", "action": "error"},
            "message": error.to_string(),
        });
        if let Ok(payload) = payload_from(&details) {
            self.buffer
                .push(Record::new(&self.source_id, self.probe.task_type(), payload));
        }
    }

    fn producer(&self) -> Option<&dyn Producer> {
        Some(self)
    }
}

impl<P: Probe> Producer for ProbeTask<P> {
    fn vote(&self) -> FlushVote {
        self.probe.vote(self.buffer.len())
    }

    fn drain(&self) -> Vec<Record> {
        self.buffer.drain()
    }

    fn pending(&self) -> usize {
        self.buffer.len()
    }
}
