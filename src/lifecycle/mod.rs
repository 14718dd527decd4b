//! Supervisor lifecycle events: types and broadcast bus.
//!
//! ## Contents
//! - [`LifecycleKind`], [`LifecycleEvent`] classification and process metadata
//! - [`LifecycleBus`] two `tokio::sync::broadcast` lanes (transitions, output)
//!   read through one [`LifecycleReceiver`]
//!
//! ## Quick reference
//! - **Publishers**: `Monitor` (start/stop/restart/exit/error/warn) and its
//!   output pumps (stdout/stderr).
//! - **Consumers**: the controller forwarder of each service, which re-emits
//!   every event as `<service>::<kind>` on the controller bus.

mod bus;
mod event;

pub use bus::{LifecycleBus, LifecycleReceiver};
pub use event::{LifecycleEvent, LifecycleKind};
