//! Payload types emitted by the built-in probes.

use serde::{Deserialize, Serialize};

/// A snapshot of the running process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSample {
    pub event: String,
    pub pid: u32,
    pub process_name: String,
    pub host: String,
    /// Whole seconds of active (unpaused) collection time
    pub running_secs: u64,
}

/// A change of the focused window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSample {
    pub event: String,
    pub process_name: String,
    pub win_title: String,
    pub win_size: String,
}

/// Mouse button classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
}

/// A mouse click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MouseSample {
    pub event: String,
    pub button: MouseButton,
    pub coordinate: String,
}

/// A burst of keyboard input (counts only, never content).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardSample {
    pub event: String,
    pub key_count: u32,
}

/// A clipboard change (length only, never content).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipboardSample {
    pub event: String,
    pub content_length: usize,
}
