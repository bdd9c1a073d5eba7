//! Collection transparency log.
//!
//! Tracks what the collector has persisted and how flush rounds went, so a
//! user can audit collection without reading the activity log itself.

use crate::core::record::Record;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Collection statistics for the current session.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Records written by the durable sink
    records_persisted: AtomicU64,
    /// Rounds that persisted a batch
    rounds_persisted: AtomicU64,
    /// Rounds aborted by a Disagree vote
    rounds_vetoed: AtomicU64,
    /// Rounds with nothing to drain
    rounds_idle: AtomicU64,
    /// Failed or panicked work units across all tasks
    work_failures: AtomicU64,
    /// Failed persistence attempts
    persist_failures: AtomicU64,
    /// Persisted records per task type
    records_by_type: Mutex<BTreeMap<String, u64>>,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    /// Create a new transparency log.
    pub fn new() -> Self {
        Self {
            records_persisted: AtomicU64::new(0),
            rounds_persisted: AtomicU64::new(0),
            rounds_vetoed: AtomicU64::new(0),
            rounds_idle: AtomicU64::new(0),
            work_failures: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            records_by_type: Mutex::new(BTreeMap::new()),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a transparency log that continues the counts saved at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            warn!(error = %e, "could not load previous transparency stats");
        }

        log
    }

    /// Record a persisted batch.
    pub fn record_round_persisted(&self, batch: &[Record]) {
        self.rounds_persisted.fetch_add(1, Ordering::Relaxed);
        self.records_persisted
            .fetch_add(batch.len() as u64, Ordering::Relaxed);

        let mut by_type = self.records_by_type.lock();
        for record in batch {
            *by_type.entry(record.task_type.clone()).or_default() += 1;
        }
    }

    pub fn record_round_vetoed(&self) {
        self.rounds_vetoed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_round_idle(&self) {
        self.rounds_idle.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_work_failure(&self) {
        self.work_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            records_persisted: self.records_persisted.load(Ordering::Relaxed),
            rounds_persisted: self.rounds_persisted.load(Ordering::Relaxed),
            rounds_vetoed: self.rounds_vetoed.load(Ordering::Relaxed),
            rounds_idle: self.rounds_idle.load(Ordering::Relaxed),
            work_failures: self.work_failures.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            records_by_type: self.records_by_type.lock().clone(),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        let by_type = if stats.records_by_type.is_empty() {
            "   (none)".to_string()
        } else {
            stats
                .records_by_type
                .iter()
                .map(|(task_type, count)| format!("   {task_type}: {count}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "Collection Statistics:\n\
             - Records persisted: {}\n\
             - Rounds persisted: {}\n\
             - Rounds vetoed: {}\n\
             - Idle rounds: {}\n\
             - Work unit failures: {}\n\
             - Persistence failures: {}\n\
             - Session duration: {} seconds\n\
             \n\
             Records by type:\n{}",
            stats.records_persisted,
            stats.rounds_persisted,
            stats.rounds_vetoed,
            stats.rounds_idle,
            stats.work_failures,
            stats.persist_failures,
            stats.session_duration_secs,
            by_type
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                records_persisted: stats.records_persisted,
                rounds_persisted: stats.rounds_persisted,
                rounds_vetoed: stats.rounds_vetoed,
                rounds_idle: stats.rounds_idle,
                work_failures: stats.work_failures,
                persist_failures: stats.persist_failures,
                records_by_type: stats.records_by_type,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load stats from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.records_persisted
                    .store(persisted.records_persisted, Ordering::Relaxed);
                self.rounds_persisted
                    .store(persisted.rounds_persisted, Ordering::Relaxed);
                self.rounds_vetoed
                    .store(persisted.rounds_vetoed, Ordering::Relaxed);
                self.rounds_idle
                    .store(persisted.rounds_idle, Ordering::Relaxed);
                self.work_failures
                    .store(persisted.work_failures, Ordering::Relaxed);
                self.persist_failures
                    .store(persisted.persist_failures, Ordering::Relaxed);
                *self.records_by_type.lock() = persisted.records_by_type;
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.records_persisted.store(0, Ordering::Relaxed);
        self.rounds_persisted.store(0, Ordering::Relaxed);
        self.rounds_vetoed.store(0, Ordering::Relaxed);
        self.rounds_idle.store(0, Ordering::Relaxed);
        self.work_failures.store(0, Ordering::Relaxed);
        self.persist_failures.store(0, Ordering::Relaxed);
        self.records_by_type.lock().clear();
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of collection statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub records_persisted: u64,
    pub rounds_persisted: u64,
    pub rounds_vetoed: u64,
    pub rounds_idle: u64,
    pub work_failures: u64,
    pub persist_failures: u64,
    pub records_by_type: BTreeMap<String, u64>,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    records_persisted: u64,
    rounds_persisted: u64,
    rounds_vetoed: u64,
    #[serde(default)]
    rounds_idle: u64,
    work_failures: u64,
    persist_failures: u64,
    #[serde(default)]
    records_by_type: BTreeMap<String, u64>,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

/// Create a new shared transparency log.
pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

/// Create a new shared transparency log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}
