//! Activity records produced by probes.

use chrono::{Local, NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wall-clock format used for persisted timestamps (microsecond precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// One structured, timestamped activity event.
///
/// Records are immutable once enqueued; ownership moves to whoever drains
/// the producing buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// User or session the record belongs to
    pub source_id: String,
    /// Local wall-clock time the record was produced
    #[serde(with = "timestamp_serde")]
    pub timestamp: NaiveDateTime,
    /// Kind of probe that produced the record
    pub task_type: String,
    /// Probe-specific details
    pub payload: Map<String, Value>,
}

impl Record {
    /// Create a record stamped with the current local time.
    pub fn new(
        source_id: impl Into<String>,
        task_type: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Self {
        Self::with_timestamp(source_id, task_type, Local::now().naive_local(), payload)
    }

    /// Create a record with an explicit timestamp, truncated to microseconds.
    pub fn with_timestamp(
        source_id: impl Into<String>,
        task_type: impl Into<String>,
        timestamp: NaiveDateTime,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            timestamp: timestamp.trunc_subsecs(6),
            task_type: task_type.into(),
            payload,
        }
    }

    /// Timestamp rendered in the persisted format.
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Turn any serializable value into a record payload.
///
/// Objects are used as-is; anything else is wrapped as `{"value": ..}`.
pub fn payload_from<T: Serialize>(value: &T) -> Result<Map<String, Value>, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            Ok(map)
        }
    }
}

/// Sort records by timestamp, ascending.
///
/// The sort is stable: records with equal timestamps keep their relative
/// order.
pub fn sort_by_timestamp(records: &mut [Record]) {
    records.sort_by_key(|record| record.timestamp);
}

/// Serde support for the persisted timestamp format.
mod timestamp_serde {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(timestamp: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&timestamp.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(D::Error::custom)
    }
}
