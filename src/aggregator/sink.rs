//! Destinations for persisted batches.

use crate::core::record::Record;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors raised while persisting a batch.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("sink {0} is unavailable")]
    Unavailable(String),
}

/// A destination for one flush round's sorted batch.
pub trait BatchSink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Persist `batch`. Either the whole batch is accepted or an error is
    /// returned.
    fn persist(&self, batch: &[Record]) -> Result<(), SinkError>;
}

/// How a [`JsonFileSink`] treats existing file contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Append each round's array after the previous ones
    #[default]
    Append,
    /// Replace the file with the latest round
    Rewrite,
}

impl std::str::FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "append" => Ok(WriteMode::Append),
            "rewrite" => Ok(WriteMode::Rewrite),
            other => Err(format!("unknown write mode: {other}")),
        }
    }
}

/// Durable log file holding one pretty-printed JSON array per round.
#[derive(Debug)]
pub struct JsonFileSink {
    path: PathBuf,
    mode: WriteMode,
    write_lock: Mutex<()>,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>, mode: WriteMode) -> Self {
        Self {
            path: path.into(),
            mode,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Read every batch stored in a log file, oldest first.
    pub fn read_batches(path: &Path) -> Result<Vec<Vec<Record>>, SinkError> {
        let file = std::fs::File::open(path).map_err(|source| SinkError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::Deserializer::from_reader(BufReader::new(file))
            .into_iter::<Vec<Record>>()
            .map(|batch| batch.map_err(SinkError::from))
            .collect()
    }

    fn encode(batch: &[Record]) -> Result<Vec<u8>, SinkError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        batch.serialize(&mut serializer)?;
        buf.push(b'\n');
        Ok(buf)
    }

    fn io_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl BatchSink for JsonFileSink {
    fn name(&self) -> &str {
        "json-file"
    }

    fn persist(&self, batch: &[Record]) -> Result<(), SinkError> {
        let encoded = Self::encode(batch)?;
        let _guard = self.write_lock.lock();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let mut options = OpenOptions::new();
        options.create(true);
        match self.mode {
            WriteMode::Append => options.append(true),
            WriteMode::Rewrite => options.write(true).truncate(true),
        };

        let mut file = options.open(&self.path).map_err(|e| self.io_error(e))?;
        file.write_all(&encoded).map_err(|e| self.io_error(e))?;
        file.sync_data().map_err(|e| self.io_error(e))?;
        Ok(())
    }
}

/// Emits every persisted record as a structured tracing event.
#[derive(Debug, Default)]
pub struct TracingSink;

impl BatchSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn persist(&self, batch: &[Record]) -> Result<(), SinkError> {
        for record in batch {
            let payload = serde_json::to_string(&record.payload)?;
            info!(
                target: "activity",
                source_id = %record.source_id,
                timestamp = %record.formatted_timestamp(),
                task_type = %record.task_type,
                payload = %payload,
                "record"
            );
        }
        Ok(())
    }
}

/// Keeps persisted batches in memory.
///
/// Cloning yields a handle to the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<Vec<Record>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch persisted so far.
    pub fn batches(&self) -> Vec<Vec<Record>> {
        self.batches.lock().clone()
    }

    /// Every persisted record, flattened in persistence order.
    pub fn records(&self) -> Vec<Record> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }
}

impl BatchSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn persist(&self, batch: &[Record]) -> Result<(), SinkError> {
        self.batches.lock().push(batch.to_vec());
        Ok(())
    }
}
