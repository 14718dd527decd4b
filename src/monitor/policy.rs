//! # Restart policy for supervised processes.
//!
//! [`RestartPolicy`] decides what happens after a process exits. The decision is a pure
//! function of the policy and an [`ExitContext`], evaluated in this order:
//!
//! ```text
//! 1. force_stop                                  → Stopped
//! 2. max_restarts = Some(n), restart_count >= n  → Exited { spinning }
//! 3. spinning, no force_restart, spin_sleep None → Exited { spinning: true }
//! 4. spinning, spin_sleep Some(d)                → RestartAfter(d)
//! 5. otherwise                                   → RestartNow
//! ```
//!
//! A process is *spinning* when it ran for less than `min_uptime`. Rule 3 is the
//! crash-loop breaker; `max_restarts = None` means restart forever.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// When and how fast an exited process is relaunched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    /// Runs shorter than this are spinning.
    #[serde(with = "humantime_serde")]
    pub min_uptime: Duration,
    /// Delay before relaunching a spinning process (`None`: give up instead).
    #[serde(with = "humantime_serde")]
    pub spin_sleep: Option<Duration>,
    /// Restart budget (`None`: forever).
    pub max_restarts: Option<u32>,
}

impl Default for RestartPolicy {
    /// `min_uptime = 2s`, `spin_sleep = 1s`, `max_restarts = 5`.
    fn default() -> Self {
        Self {
            min_uptime: Duration::from_secs(2),
            spin_sleep: Some(Duration::from_secs(1)),
            max_restarts: Some(5),
        }
    }
}

/// Facts about one exit, gathered by the supervisor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitContext {
    /// `stop()` was requested.
    pub force_stop: bool,
    /// `restart()` was requested.
    pub force_restart: bool,
    pub spinning: bool,
    /// Restarts performed so far.
    pub restart_count: u32,
}

/// Outcome of [`RestartPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    /// Terminal, requested.
    Stopped,
    /// Terminal, by policy.
    Exited { spinning: bool },
    RestartAfter(Duration),
    RestartNow,
}

impl ExitDecision {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExitDecision::Stopped | ExitDecision::Exited { .. })
    }
}

impl RestartPolicy {
    /// Restart forever, relaunching spinning processes after `spin_sleep`.
    pub fn forever(spin_sleep: Duration) -> Self {
        Self {
            spin_sleep: Some(spin_sleep),
            max_restarts: None,
            ..Self::default()
        }
    }

    #[inline]
    pub fn is_spinning(&self, uptime: Duration) -> bool {
        uptime < self.min_uptime
    }

    pub fn decide(&self, ctx: ExitContext) -> ExitDecision {
        if ctx.force_stop {
            return ExitDecision::Stopped;
        }
        if let Some(max) = self.max_restarts {
            if ctx.restart_count >= max {
                return ExitDecision::Exited {
                    spinning: ctx.spinning,
                };
            }
        }
        if !ctx.spinning {
            return ExitDecision::RestartNow;
        }
        match (self.spin_sleep, ctx.force_restart) {
            (Some(delay), _) => ExitDecision::RestartAfter(delay),
            (None, true) => ExitDecision::RestartNow,
            (None, false) => ExitDecision::Exited { spinning: true },
        }
    }
}
