//! # Broadcast channels for lifecycle events.
//!
//! Each supervisor owns one [`LifecycleBus`]. The owning controller keeps one
//! receiver per service and turns every event into a named bus event; tests and
//! other observers may subscribe as well.
//!
//! ```text
//! Monitor actor ──┐                  transitions ─┐
//! stop()/start()──┼──► LifecycleBus ─┤            ├─► LifecycleReceiver ──► on_child_event
//! output pumps  ──┘                  output ──────┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never waits.
//! - **Bounded capacity**: receivers that fall behind get `RecvError::Lagged(n)`.
//! - **Separate output lane**: `stdout`/`stderr` chunks have their own channel, so a
//!   chatty child can only push out other output, never `start`/`restart`/`stop`/`exit`.
//! - **No persistence**: events published with no receiver are dropped.

use tokio::sync::broadcast::{self, error::RecvError};

use super::event::{LifecycleEvent, LifecycleKind};

/// Broadcast channels carrying [`LifecycleEvent`]s. Cheap to clone.
#[derive(Clone, Debug)]
pub struct LifecycleBus {
    transitions: broadcast::Sender<LifecycleEvent>,
    output: broadcast::Sender<LifecycleEvent>,
}

/// Receiver over both lanes of a [`LifecycleBus`].
///
/// Buffered output is delivered before a pending transition, so the chunks a
/// process wrote before exiting arrive ahead of its `exit`.
#[derive(Debug)]
pub struct LifecycleReceiver {
    transitions: broadcast::Receiver<LifecycleEvent>,
    output: broadcast::Receiver<LifecycleEvent>,
    output_closed: bool,
}

impl LifecycleBus {
    /// Creates a bus; each lane holds `capacity` events, clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (transitions, _) = broadcast::channel(capacity.max(1));
        let (output, _) = broadcast::channel(capacity.max(1));
        Self {
            transitions,
            output,
        }
    }

    pub fn publish(&self, ev: LifecycleEvent) {
        let lane = match ev.kind {
            LifecycleKind::Stdout | LifecycleKind::Stderr => &self.output,
            _ => &self.transitions,
        };
        let _ = lane.send(ev);
    }

    /// A receiver observing events published from now on.
    pub fn subscribe(&self) -> LifecycleReceiver {
        LifecycleReceiver {
            transitions: self.transitions.subscribe(),
            output: self.output.subscribe(),
            output_closed: false,
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.transitions.receiver_count()
    }
}

impl LifecycleReceiver {
    /// Next event from either lane.
    ///
    /// `Lagged(n)` reports `n` events lost on one lane; `Closed` once the bus is gone
    /// and both lanes are drained.
    pub async fn recv(&mut self) -> Result<LifecycleEvent, RecvError> {
        loop {
            if self.output_closed {
                return self.transitions.recv().await;
            }
            tokio::select! {
                biased;
                ev = self.output.recv() => match ev {
                    Err(RecvError::Closed) => self.output_closed = true,
                    other => return other,
                },
                ev = self.transitions.recv() => return ev,
            }
        }
    }
}
