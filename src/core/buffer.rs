//! Per-producer record buffers and flush votes.

use crate::core::record::Record;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

/// A producer's answer when the aggregator asks to drain it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushVote {
    /// Has data and consents to be drained now
    Agree,
    /// Vetoes the whole round
    Disagree,
    /// Has nothing and does not care either way
    Skip,
}

impl FlushVote {
    /// The default vote: agree when something is pending, skip otherwise.
    pub fn for_pending(pending: usize) -> Self {
        if pending == 0 {
            FlushVote::Skip
        } else {
            FlushVote::Agree
        }
    }
}

/// Something the aggregator can poll and drain.
pub trait Producer: Send + Sync {
    /// Vote on whether this round may drain the producer.
    fn vote(&self) -> FlushVote;

    /// Remove and return the records currently buffered.
    fn drain(&self) -> Vec<Record>;

    /// Number of records currently buffered.
    fn pending(&self) -> usize;
}

/// FIFO buffer with one writer (the producing task) and one drainer.
///
/// Backed by a lock-free channel, so neither side needs external locking.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    sender: Sender<Record>,
    receiver: Receiver<Record>,
}

impl LogBuffer {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Append a record.
    pub fn push(&self, record: Record) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.sender.send(record);
    }

    /// Take the records present when the drain starts, without blocking.
    ///
    /// Records pushed while draining stay buffered for the next drain.
    pub fn drain(&self) -> Vec<Record> {
        let present = self.receiver.len();
        self.receiver.try_iter().take(present).collect()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}
