//! Quorum flush protocol.
//!
//! Each round the aggregator polls every producer for a [`FlushVote`]:
//! a single `Disagree` aborts the round, a round where everyone skips is
//! idle, and otherwise only the `Agree` voters are drained.

use crate::core::buffer::FlushVote;
use crate::core::task::ScheduledTask;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How producers are polled before a drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Every producer is treated as agreeing
    Simple,
    /// Producers vote Agree / Disagree / Skip
    #[default]
    Quorum,
}

impl std::str::FromStr for FlushMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simple" => Ok(FlushMode::Simple),
            "quorum" => Ok(FlushMode::Quorum),
            other => Err(format!("unknown flush mode: {other}")),
        }
    }
}

impl std::fmt::Display for FlushMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlushMode::Simple => write!(f, "simple"),
            FlushMode::Quorum => write!(f, "quorum"),
        }
    }
}

/// One producer's vote in a round.
#[derive(Debug, Clone)]
pub struct Ballot {
    pub producer: Arc<ScheduledTask>,
    pub vote: FlushVote,
}

/// Outcome of counting a round's ballots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundDecision {
    /// Drain the producers that agreed
    Proceed,
    /// At least one producer disagreed; nothing is drained
    Vetoed { by: Vec<String> },
    /// Nobody has anything to drain
    Idle,
}

/// Ask every producer for its vote.
///
/// Tasks without a producer side are ignored. In simple mode no producer is
/// asked and all are recorded as agreeing.
pub fn poll_votes(producers: &[Arc<ScheduledTask>], mode: FlushMode) -> Vec<Ballot> {
    producers
        .iter()
        .filter_map(|task| {
            let producer = task.producer()?;
            let vote = match mode {
                FlushMode::Simple => FlushVote::Agree,
                FlushMode::Quorum => producer.vote(),
            };
            Some(Ballot {
                producer: Arc::clone(task),
                vote,
            })
        })
        .collect()
}

/// Count the ballots of a round.
pub fn decide(ballots: &[Ballot]) -> RoundDecision {
    let vetoed_by: Vec<String> = ballots
        .iter()
        .filter(|ballot| ballot.vote == FlushVote::Disagree)
        .map(|ballot| ballot.producer.identifier().to_string())
        .collect();

    if !vetoed_by.is_empty() {
        return RoundDecision::Vetoed { by: vetoed_by };
    }

    if ballots.iter().all(|ballot| ballot.vote == FlushVote::Skip) {
        return RoundDecision::Idle;
    }

    RoundDecision::Proceed
}
