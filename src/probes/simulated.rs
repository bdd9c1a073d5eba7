//! Built-in probes.
//!
//! These produce simulated activity; no OS hooks are installed. The process
//! probe reports the agent's own pid, executable and host name.

use crate::core::task::TaskError;
use crate::probes::types::{
    ClipboardSample, KeyboardSample, MouseButton, MouseSample, ProcessSample, WindowSample,
};
use crate::probes::{Probe, ProbeContext};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const PROCESS_TASK_TYPE: &str = "process";
pub const WINDOW_TASK_TYPE: &str = "window";
pub const MOUSE_TASK_TYPE: &str = "mouse";
pub const KEYBOARD_TASK_TYPE: &str = "keyboard";
pub const CLIPBOARD_TASK_TYPE: &str = "clipboard";

/// Categories refreshed after every mouse or keyboard sample.
const INPUT_CASCADE: [&str; 2] = [WINDOW_TASK_TYPE, PROCESS_TASK_TYPE];

fn current_process_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Samples the agent's own process.
#[derive(Debug)]
pub struct ProcessProbe {
    interval: Duration,
}

impl ProcessProbe {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Probe for ProcessProbe {
    fn task_type(&self) -> &'static str {
        PROCESS_TASK_TYPE
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn sample(&self, ctx: &ProbeContext<'_>) -> Result<(), TaskError> {
        let host = hostname::get()
            .map_err(|e| TaskError::failed(format!("hostname lookup failed: {e}")))?
            .to_string_lossy()
            .into_owned();

        ctx.emit(&ProcessSample {
            event: "snapshot".into(),
            pid: std::process::id(),
            process_name: current_process_name(),
            host,
            running_secs: ctx.elapsed().as_secs(),
        })
    }
}

/// Simulated focus-window changes.
#[derive(Debug)]
pub struct FocusWindowProbe {
    interval: Duration,
    changes: AtomicU64,
}

impl FocusWindowProbe {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            changes: AtomicU64::new(0),
        }
    }
}

impl Probe for FocusWindowProbe {
    fn task_type(&self) -> &'static str {
        WINDOW_TASK_TYPE
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn sample(&self, ctx: &ProbeContext<'_>) -> Result<(), TaskError> {
        let change = self.changes.fetch_add(1, Ordering::Relaxed);
        ctx.emit(&WindowSample {
            event: "focus_change".into(),
            process_name: current_process_name(),
            win_title: format!("window {}", change % 4),
            win_size: "1280x720".into(),
        })
    }
}

/// Simulated mouse clicks; each click refreshes the window and process
/// probes.
#[derive(Debug)]
pub struct MouseProbe {
    interval: Duration,
    clicks: AtomicU64,
}

impl MouseProbe {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            clicks: AtomicU64::new(0),
        }
    }
}

impl Probe for MouseProbe {
    fn task_type(&self) -> &'static str {
        MOUSE_TASK_TYPE
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn sample(&self, ctx: &ProbeContext<'_>) -> Result<(), TaskError> {
        let click = self.clicks.fetch_add(1, Ordering::Relaxed);
        ctx.emit(&MouseSample {
            event: "click".into(),
            button: if click % 5 == 4 {
                MouseButton::Right
            } else {
                MouseButton::Left
            },
            coordinate: format!("{},{}", (click * 37) % 1280, (click * 53) % 720),
        })?;

        for task_type in INPUT_CASCADE {
            ctx.trigger(task_type);
        }
        Ok(())
    }
}

/// Simulated keyboard input; each burst refreshes the window and process
/// probes.
#[derive(Debug)]
pub struct KeyboardProbe {
    interval: Duration,
    bursts: AtomicU64,
}

impl KeyboardProbe {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            bursts: AtomicU64::new(0),
        }
    }
}

impl Probe for KeyboardProbe {
    fn task_type(&self) -> &'static str {
        KEYBOARD_TASK_TYPE
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn sample(&self, ctx: &ProbeContext<'_>) -> Result<(), TaskError> {
        let burst = self.bursts.fetch_add(1, Ordering::Relaxed);
        ctx.emit(&KeyboardSample {
            event: "input".into(),
            key_count: 1 + (burst % 12) as u32,
        })?;

        for task_type in INPUT_CASCADE {
            ctx.trigger(task_type);
        }
        Ok(())
    }
}

/// Simulated clipboard changes.
#[derive(Debug)]
pub struct ClipboardProbe {
    interval: Duration,
    changes: AtomicU64,
}

impl ClipboardProbe {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            changes: AtomicU64::new(0),
        }
    }
}

impl Probe for ClipboardProbe {
    fn task_type(&self) -> &'static str {
        CLIPBOARD_TASK_TYPE
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn sample(&self, ctx: &ProbeContext<'_>) -> Result<(), TaskError> {
        let change = self.changes.fetch_add(1, Ordering::Relaxed);
        ctx.emit(&ClipboardSample {
            event: "change".into(),
            content_length: (change as usize * 17) % 256,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::buffer::Producer;
    use crate::core::registry::Registry;
    use crate::core::task::{ScheduledTask, Task, TaskContext, TaskEnv};
    use crate::probes::ProbeTask;
    use std::sync::Arc;

    fn registry_with_window(env: &TaskEnv) -> (Registry, Arc<ScheduledTask>) {
        let window = ProbeTask::new("1000", FocusWindowProbe::new(Duration::from_secs(60))).unwrap();
        let scheduled =
            Arc::new(ScheduledTask::new("window", Arc::new(window), env.clone()).unwrap());
        let registry = Registry::builder()
            .task("window", Arc::clone(&scheduled))
            .unwrap()
            .build();
        (registry, scheduled)
    }

    #[test]
    fn test_process_probe_reports_own_pid() {
        let task = ProbeTask::new("1000", ProcessProbe::new(Duration::from_secs(5))).unwrap();
        let env = TaskEnv::default();
        let registry = Registry::default();
        task.perform_work(&TaskContext::new("process", &env, &registry))
            .unwrap();

        let records = task.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].task_type, PROCESS_TASK_TYPE);
        assert_eq!(records[0].payload["pid"], std::process::id());
    }

    #[test]
    fn test_mouse_probe_cascades_to_window() {
        let env = TaskEnv::default();
        let (registry, window) = registry_with_window(&env);
        assert!(!window.is_triggered());
        let mouse = ProbeTask::new("1000", MouseProbe::new(Duration::from_secs(2))).unwrap();

        mouse
            .perform_work(&TaskContext::new("mouse", &env, &registry))
            .unwrap();

        assert_eq!(mouse.pending(), 1);
        assert!(window.is_triggered());
    }

    #[test]
    fn test_keyboard_and_clipboard_emit_counts_only() {
        let env = TaskEnv::default();
        let registry = Registry::default();

        let keyboard = ProbeTask::new("1000", KeyboardProbe::new(Duration::from_secs(2))).unwrap();
        keyboard
            .perform_work(&TaskContext::new("keyboard", &env, &registry))
            .unwrap();
        let records = keyboard.drain();
        assert_eq!(records[0].payload["key_count"], 1);

        let clipboard =
            ProbeTask::new("1000", ClipboardProbe::new(Duration::from_secs(2))).unwrap();
        clipboard
            .perform_work(&TaskContext::new("clipboard", &env, &registry))
            .unwrap();
        let records = clipboard.drain();
        assert!(records[0].payload.contains_key("content_length"));
    }
}
