//! Configuration for the activity sensor agent.

use crate::aggregator::{FlushMode, WriteMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Source id used when the host name cannot be determined.
pub const FALLBACK_SOURCE_ID: &str = "1000";

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// User or session identifier stamped on every record
    pub source_id: String,

    /// Per-probe settings
    pub probes: ProbeConfig,

    /// Time between aggregating logger rounds
    #[serde(with = "duration_serde")]
    pub logger_interval: Duration,

    /// How producers are polled before a drain
    pub flush_mode: FlushMode,

    /// Durable activity log
    pub log_path: PathBuf,

    /// Whether each round is appended to the log or replaces it
    pub write_mode: WriteMode,

    /// Path for storing state and transparency stats
    pub data_path: PathBuf,

    /// Whether collection is currently paused
    pub paused: bool,

    /// How long shutdown waits for each task thread
    #[serde(with = "duration_serde")]
    pub join_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("activity-sensor-agent");

        Self {
            source_id: default_source_id(),
            probes: ProbeConfig::default(),
            logger_interval: Duration::from_secs(12),
            flush_mode: FlushMode::default(),
            log_path: data_dir.join("logs.json"),
            write_mode: WriteMode::default(),
            data_path: data_dir,
            paused: false,
            join_timeout: Duration::from_secs(1),
        }
    }
}

fn default_source_id() -> String {
    hostname::get()
        .ok()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_SOURCE_ID.to_string())
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it does
    /// not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("activity-sensor-agent")
            .join("config.json")
    }

    /// Path of the persisted transparency stats.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("transparency.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }
        Ok(())
    }

    /// Reject configurations the collector cannot be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_id.trim().is_empty() {
            return Err(ConfigError::Invalid("source_id must be provided".into()));
        }
        if self.logger_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "logger_interval must be greater than zero".into(),
            ));
        }
        if self.join_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "join_timeout must be greater than zero".into(),
            ));
        }
        if !self.probes.any_enabled() {
            return Err(ConfigError::Invalid(
                "at least one probe must be enabled".into(),
            ));
        }
        for (name, settings) in self.probes.iter() {
            if settings.enabled && settings.interval.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "{name} interval must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

/// Whether a probe runs and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSettings {
    pub enabled: bool,
    #[serde(with = "duration_serde")]
    pub interval: Duration,
}

impl ProbeSettings {
    pub fn every(interval: Duration) -> Self {
        Self {
            enabled: true,
            interval,
        }
    }
}

/// Settings for every built-in probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub process: ProbeSettings,
    pub window: ProbeSettings,
    pub mouse: ProbeSettings,
    pub keyboard: ProbeSettings,
    pub clipboard: ProbeSettings,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            process: ProbeSettings::every(Duration::from_secs(5)),
            window: ProbeSettings::every(Duration::from_secs(5)),
            mouse: ProbeSettings::every(Duration::from_secs(2)),
            keyboard: ProbeSettings::every(Duration::from_secs(2)),
            clipboard: ProbeSettings::every(Duration::from_secs(2)),
        }
    }
}

impl ProbeConfig {
    /// Enable the probes named in a comma-separated list (`all` for every
    /// probe), keeping the configured intervals.
    pub fn from_csv(s: &str, base: &ProbeConfig) -> Self {
        let names: Vec<String> = s.split(',').map(|s| s.trim().to_lowercase()).collect();
        let wants = |name: &str| names.iter().any(|n| n == name || n == "all");

        let pick = |name: &str, settings: ProbeSettings| ProbeSettings {
            enabled: wants(name),
            ..settings
        };

        Self {
            process: pick("process", base.process),
            window: pick("window", base.window),
            mouse: pick("mouse", base.mouse),
            keyboard: pick("keyboard", base.keyboard),
            clipboard: pick("clipboard", base.clipboard),
        }
    }

    /// Check if at least one probe is enabled.
    pub fn any_enabled(&self) -> bool {
        self.iter().any(|(_, settings)| settings.enabled)
    }

    /// Probe names with their settings, in registry order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, ProbeSettings)> {
        [
            ("process", self.process),
            ("window", self.window),
            ("mouse", self.mouse),
            ("keyboard", self.keyboard),
            ("clipboard", self.clipboard),
        ]
        .into_iter()
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as fractional seconds.
mod duration_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("activity-config-{}", uuid::Uuid::new_v4()))
            .join("config.json")
    }

    #[test]
    fn test_probe_selection_parsing() {
        let base = ProbeConfig::default();

        let config = ProbeConfig::from_csv("mouse,keyboard", &base);
        assert!(config.mouse.enabled);
        assert!(config.keyboard.enabled);
        assert!(!config.process.enabled);
        assert_eq!(config.mouse.interval, Duration::from_secs(2));

        let config = ProbeConfig::from_csv("all", &base);
        assert!(config.iter().all(|(_, s)| s.enabled));

        let config = ProbeConfig::from_csv("nothing", &base);
        assert!(!config.any_enabled());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logger_interval, Duration::from_secs(12));
        assert_eq!(config.probes.process.interval, Duration::from_secs(5));
        assert_eq!(config.flush_mode, FlushMode::Quorum);
        assert_eq!(config.write_mode, WriteMode::Append);
        assert!(!config.paused);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_missing_values() {
        let mut config = Config::default();
        config.source_id = " ".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.probes.mouse.interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.probes = ProbeConfig::from_csv("", &config.probes);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        // A disabled probe may keep a zero interval.
        let mut config = Config::default();
        config.probes.clipboard = ProbeSettings {
            enabled: false,
            interval: Duration::ZERO,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = temp_config_path();
        let mut config = Config::default();
        config.paused = true;
        config.probes.mouse.interval = Duration::from_millis(250);
        config.flush_mode = FlushMode::Simple;
        config.save_to(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["probes"]["mouse"]["interval"], 0.25);
        assert_eq!(raw["flush_mode"], "simple");

        let loaded = Config::load_from(&path).unwrap();
        assert!(loaded.paused);
        assert_eq!(loaded.probes.mouse.interval, Duration::from_millis(250));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let loaded = Config::load_from(&temp_config_path()).unwrap();
        assert_eq!(loaded.logger_interval, Duration::from_secs(12));
    }

    #[test]
    fn test_negative_interval_rejected_on_parse() {
        let path = temp_config_path();
        let mut raw = serde_json::to_value(Config::default()).unwrap();
        raw["logger_interval"] = serde_json::json!(-1.0);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, raw.to_string()).unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::ParseError(_))
        ));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
