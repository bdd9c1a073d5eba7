//! Aggregating logger.
//!
//! A scheduled task that periodically drains producer buffers according to
//! the flush protocol, orders the merged records by timestamp and persists
//! them. Records are cleared from the accumulator only after the durable
//! sink accepted them; on failure they are retried on the next round that
//! proceeds.

pub mod flush;
pub mod sink;

pub use flush::{decide, poll_votes, Ballot, FlushMode, RoundDecision};
pub use sink::{BatchSink, JsonFileSink, MemorySink, SinkError, TracingSink, WriteMode};

use crate::core::buffer::FlushVote;
use crate::core::record::{sort_by_timestamp, Record};
use crate::core::registry::Registry;
use crate::core::task::{Task, TaskContext, TaskError};
use crate::transparency::SharedTransparencyLog;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Task type of the aggregating logger.
pub const LOGGER_TASK_TYPE: &str = "logger";

/// Outcome of one logger round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundReport {
    /// A batch was persisted
    Persisted { records: usize, producers: usize },
    /// A producer vetoed the round
    Vetoed { by: Vec<String> },
    /// Nothing to persist
    Idle,
}

/// Drains producers, sorts their records and persists them.
pub struct AggregatingLogger {
    interval: Duration,
    mode: FlushMode,
    sink: Box<dyn BatchSink>,
    observers: Vec<Box<dyn BatchSink>>,
    accumulator: Mutex<Vec<Record>>,
    stats: SharedTransparencyLog,
}

impl std::fmt::Debug for AggregatingLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatingLogger")
            .field("interval", &self.interval)
            .field("mode", &self.mode)
            .field("sink", &self.sink.name())
            .field("pending", &self.accumulator.lock().len())
            .finish()
    }
}

impl AggregatingLogger {
    /// Create a logger polling every `interval` and persisting into `sink`.
    pub fn new(interval: Duration, mode: FlushMode, sink: Box<dyn BatchSink>) -> Self {
        Self {
            interval,
            mode,
            sink,
            observers: Vec::new(),
            accumulator: Mutex::new(Vec::new()),
            stats: SharedTransparencyLog::default(),
        }
    }

    /// Also hand every persisted batch to `observer`.
    pub fn with_observer(mut self, observer: Box<dyn BatchSink>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Count rounds into `stats`.
    pub fn with_stats(mut self, stats: SharedTransparencyLog) -> Self {
        self.stats = stats;
        self
    }

    pub fn mode(&self) -> FlushMode {
        self.mode
    }

    /// Records drained but not yet persisted.
    pub fn pending(&self) -> usize {
        self.accumulator.lock().len()
    }

    /// Run one round of the flush protocol over every producer in
    /// `registry`.
    pub fn flush_round(&self, registry: &Registry) -> Result<RoundReport, SinkError> {
        let mut accumulator = self.accumulator.lock();

        let ballots = poll_votes(&registry.producers(), self.mode);
        match decide(&ballots) {
            RoundDecision::Vetoed { by } => {
                debug!(vetoed_by = ?by, "flush round vetoed");
                self.stats.record_round_vetoed();
                return Ok(RoundReport::Vetoed { by });
            }
            RoundDecision::Idle => {
                self.stats.record_round_idle();
                return Ok(RoundReport::Idle);
            }
            RoundDecision::Proceed => {}
        }

        let mut drained = 0;
        for ballot in ballots
            .iter()
            .filter(|ballot| ballot.vote == FlushVote::Agree)
        {
            if let Some(producer) = ballot.producer.producer() {
                accumulator.extend(producer.drain());
                drained += 1;
            }
        }

        self.persist_accumulated(&mut accumulator, drained)
    }

    /// Drain every producer regardless of votes and persist the result.
    ///
    /// Used for the last round at shutdown, once producers have stopped.
    pub fn final_flush(&self, registry: &Registry) -> Result<RoundReport, SinkError> {
        let mut accumulator = self.accumulator.lock();

        let mut drained = 0;
        for task in registry.producers() {
            if let Some(producer) = task.producer() {
                accumulator.extend(producer.drain());
                drained += 1;
            }
        }

        self.persist_accumulated(&mut accumulator, drained)
    }

    fn persist_accumulated(
        &self,
        accumulator: &mut Vec<Record>,
        producers: usize,
    ) -> Result<RoundReport, SinkError> {
        if accumulator.is_empty() {
            self.stats.record_round_idle();
            return Ok(RoundReport::Idle);
        }

        sort_by_timestamp(accumulator);

        if let Err(e) = self.sink.persist(accumulator) {
            self.stats.record_persist_failure();
            return Err(e);
        }

        for observer in &self.observers {
            if let Err(e) = observer.persist(accumulator) {
                warn!(sink = observer.name(), error = %e, "observer rejected batch");
            }
        }

        let records = accumulator.len();
        self.stats.record_round_persisted(accumulator);
        accumulator.clear();

        info!(records, producers, "batch persisted");
        Ok(RoundReport::Persisted { records, producers })
    }
}

impl Task for AggregatingLogger {
    fn task_type(&self) -> &str {
        LOGGER_TASK_TYPE
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn perform_work(&self, ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        self.flush_round(ctx.registry())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::buffer::{LogBuffer, Producer};
    use crate::core::task::{ScheduledTask, TaskEnv};
    use chrono::{NaiveDate, Timelike};
    use serde_json::Map;
    use std::sync::Arc;

    struct Buffered {
        buffer: LogBuffer,
        vote: Mutex<Option<FlushVote>>,
    }

    impl Producer for Buffered {
        fn vote(&self) -> FlushVote {
            let forced = *self.vote.lock();
            forced.unwrap_or_else(|| FlushVote::for_pending(self.buffer.len()))
        }

        fn drain(&self) -> Vec<Record> {
            self.buffer.drain()
        }

        fn pending(&self) -> usize {
            self.buffer.len()
        }
    }

    impl Task for Buffered {
        fn task_type(&self) -> &str {
            "buffered"
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(1)
        }

        fn perform_work(&self, _ctx: &TaskContext<'_>) -> Result<(), TaskError> {
            Ok(())
        }

        fn producer(&self) -> Option<&dyn Producer> {
            Some(self)
        }
    }

    struct FailingSink;

    impl BatchSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        fn persist(&self, _batch: &[Record]) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("failing".into()))
        }
    }

    fn record_at(task_type: &str, micros: u32) -> Record {
        let timestamp = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_micro_opt(8, 0, 0, micros)
            .unwrap();
        Record::with_timestamp("u", task_type, timestamp, Map::new())
    }

    fn setup(count: usize) -> (Registry, Vec<Arc<Buffered>>) {
        let mut builder = Registry::builder();
        let mut handles = Vec::new();
        for i in 0..count {
            let task = Arc::new(Buffered {
                buffer: LogBuffer::new(),
                vote: Mutex::new(None),
            });
            handles.push(Arc::clone(&task));
            let scheduled =
                Arc::new(ScheduledTask::new(format!("p{i}"), task, TaskEnv::default()).unwrap());
            builder = builder.task(format!("p{i}"), scheduled).unwrap();
        }
        (builder.build(), handles)
    }

    #[test]
    fn test_round_sorts_across_producers() {
        let (registry, producers) = setup(2);
        producers[0].buffer.push(record_at("a", 30));
        producers[0].buffer.push(record_at("a", 10));
        producers[1].buffer.push(record_at("b", 20));

        let sink = MemorySink::new();
        let logger = AggregatingLogger::new(
            Duration::from_secs(1),
            FlushMode::Quorum,
            Box::new(sink.clone()),
        );

        let report = logger.flush_round(&registry).unwrap();
        assert_eq!(
            report,
            RoundReport::Persisted {
                records: 3,
                producers: 2
            }
        );

        let micros: Vec<_> = sink
            .records()
            .iter()
            .map(|r| r.timestamp.nanosecond() / 1_000)
            .collect();
        assert_eq!(micros, [10, 20, 30]);
        assert_eq!(logger.pending(), 0);
    }

    #[test]
    fn test_failed_persist_keeps_records_for_retry() {
        let (registry, producers) = setup(1);
        producers[0].buffer.push(record_at("a", 1));

        let stats = SharedTransparencyLog::default();
        let logger = AggregatingLogger::new(
            Duration::from_secs(1),
            FlushMode::Simple,
            Box::new(FailingSink),
        )
        .with_stats(Arc::clone(&stats));

        assert!(logger.flush_round(&registry).is_err());
        assert_eq!(logger.pending(), 1);
        assert!(producers[0].buffer.is_empty());
        assert_eq!(stats.stats().persist_failures, 1);
    }

    #[test]
    fn test_final_flush_ignores_vetoes() {
        let (registry, producers) = setup(2);
        producers[0].buffer.push(record_at("a", 1));
        *producers[1].vote.lock() = Some(FlushVote::Disagree);

        let sink = MemorySink::new();
        let logger = AggregatingLogger::new(
            Duration::from_secs(1),
            FlushMode::Quorum,
            Box::new(sink.clone()),
        );

        assert!(matches!(
            logger.flush_round(&registry).unwrap(),
            RoundReport::Vetoed { .. }
        ));
        assert_eq!(producers[0].buffer.len(), 1);

        logger.final_flush(&registry).unwrap();
        assert_eq!(sink.records().len(), 1);
        assert!(producers[0].buffer.is_empty());
    }

    #[test]
    fn test_simple_mode_skips_empty_batches() {
        let (registry, _producers) = setup(2);
        let sink = MemorySink::new();
        let logger = AggregatingLogger::new(
            Duration::from_secs(1),
            FlushMode::Simple,
            Box::new(sink.clone()),
        );

        assert_eq!(logger.flush_round(&registry).unwrap(), RoundReport::Idle);
        assert_eq!(sink.batch_count(), 0);
    }

    #[test]
    fn test_observer_failure_does_not_block_clear() {
        let (registry, producers) = setup(1);
        producers[0].buffer.push(record_at("a", 1));

        let sink = MemorySink::new();
        let logger = AggregatingLogger::new(
            Duration::from_secs(1),
            FlushMode::Quorum,
            Box::new(sink.clone()),
        )
        .with_observer(Box::new(FailingSink));

        logger.flush_round(&registry).unwrap();
        assert_eq!(sink.records().len(), 1);
        assert_eq!(logger.pending(), 0);
    }
}
