//! # Process lifecycle events emitted by supervisors.
//!
//! [`LifecycleKind`] classifies what happened to a supervised process; the
//! [`LifecycleEvent`] struct carries the process metadata (pid, start time,
//! command) and the details relevant to that kind.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use apiary::{LifecycleEvent, LifecycleKind};
//!
//! let ev = LifecycleEvent::new(LifecycleKind::Exit, "alice")
//!     .with_spinning(true)
//!     .with_restart_count(5);
//!
//! assert_eq!(ev.kind.as_label(), "exit");
//! assert_eq!(ev.spinning, Some(true));
//! assert_eq!(ev.to_json()["spinning"], true);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value, json};

use crate::monitor::ProcessInfo;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    /// First launch of the process.
    ///
    /// Sets:
    /// - `pid`, `started_at`, `command`: the new process
    Start,

    /// Relaunch after an exit (automatic or requested).
    ///
    /// Sets:
    /// - `pid`, `started_at`, `command`: the new process
    /// - `restart_count`: restarts so far, this one included
    Restart,

    /// Stop requested; the process was signalled.
    ///
    /// Sets:
    /// - `pid`, `started_at`, `command`: the process being stopped
    Stop,

    /// Terminal: the supervisor will not restart the process.
    ///
    /// Sets:
    /// - `spinning`: whether the last run was shorter than the minimum uptime
    /// - `restart_count`: restarts performed
    /// - `reason`: `stopped` or `exited`
    Exit,

    /// Chunk of standard output.
    ///
    /// Sets:
    /// - `data`: raw bytes, no line buffering
    /// - `pid`
    Stdout,

    /// Chunk of standard error.
    ///
    /// Sets:
    /// - `data`: raw bytes, no line buffering
    /// - `pid`
    Stderr,

    /// Spawn failure or misuse (stop while not running, ...).
    ///
    /// Sets:
    /// - `reason`: error message
    Error,

    /// Something worth noticing that changes nothing by itself.
    ///
    /// Emitted on every process exit (with `exit_code`, `spinning`) and for every
    /// delayed restart (with `delay_ms`).
    Warn,
}

impl LifecycleKind {
    /// Short stable label, also used as the last event-name segment when re-emitted on a bus.
    pub fn as_label(&self) -> &'static str {
        match self {
            LifecycleKind::Start => "start",
            LifecycleKind::Restart => "restart",
            LifecycleKind::Stop => "stop",
            LifecycleKind::Exit => "exit",
            LifecycleKind::Stdout => "stdout",
            LifecycleKind::Stderr => "stderr",
            LifecycleKind::Error => "error",
            LifecycleKind::Warn => "warn",
        }
    }
}

/// Lifecycle event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`LifecycleKind`]
#[derive(Clone, Debug)]
pub struct LifecycleEvent {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: LifecycleKind,
    /// Supervisor id (the service name).
    pub monitor: Arc<str>,

    pub pid: Option<u32>,
    pub started_at: Option<SystemTime>,
    pub command: Option<Arc<str>>,
    pub restart_count: Option<u32>,
    pub spinning: Option<bool>,
    pub exit_code: Option<i32>,
    /// Restart delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Output chunk.
    pub data: Option<Arc<[u8]>>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
}

impl LifecycleEvent {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: LifecycleKind, monitor: impl Into<Arc<str>>) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            monitor: monitor.into(),
            pid: None,
            started_at: None,
            command: None,
            restart_count: None,
            spinning: None,
            exit_code: None,
            delay_ms: None,
            data: None,
            reason: None,
        }
    }

    /// Attaches pid, start time and command line.
    #[inline]
    pub fn with_process(mut self, info: &ProcessInfo) -> Self {
        self.pid = Some(info.pid);
        self.started_at = Some(info.started_at);
        self.command = Some(info.command_line().into());
        self
    }

    #[inline]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    #[inline]
    pub fn with_restart_count(mut self, n: u32) -> Self {
        self.restart_count = Some(n);
        self
    }

    #[inline]
    pub fn with_spinning(mut self, spinning: bool) -> Self {
        self.spinning = Some(spinning);
        self
    }

    #[inline]
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    /// Attaches a restart delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    #[inline]
    pub fn with_data(mut self, data: &[u8]) -> Self {
        self.data = Some(Arc::from(data));
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Output chunk decoded lossily as UTF-8.
    pub fn text(&self) -> Option<String> {
        self.data
            .as_deref()
            .map(|d| String::from_utf8_lossy(d).into_owned())
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, LifecycleKind::Exit)
    }

    /// JSON metadata object used as bus payload. Unset fields are omitted.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("seq".into(), json!(self.seq));
        map.insert("kind".into(), json!(self.kind.as_label()));
        map.insert("monitor".into(), json!(&*self.monitor));
        map.insert("at".into(), json!(epoch_ms(self.at)));
        if let Some(pid) = self.pid {
            map.insert("pid".into(), json!(pid));
        }
        if let Some(t) = self.started_at {
            map.insert("started_at".into(), json!(epoch_ms(t)));
        }
        if let Some(cmd) = &self.command {
            map.insert("command".into(), json!(&**cmd));
        }
        if let Some(n) = self.restart_count {
            map.insert("restart_count".into(), json!(n));
        }
        if let Some(s) = self.spinning {
            map.insert("spinning".into(), json!(s));
        }
        if let Some(code) = self.exit_code {
            map.insert("exit_code".into(), json!(code));
        }
        if let Some(ms) = self.delay_ms {
            map.insert("delay_ms".into(), json!(ms));
        }
        if let Some(text) = self.text() {
            map.insert("data".into(), json!(text));
        }
        if let Some(reason) = &self.reason {
            map.insert("reason".into(), json!(&**reason));
        }
        Value::Object(map)
    }
}

fn epoch_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or_default()
}
