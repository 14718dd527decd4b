//! Hierarchical event bus: names, patterns and synchronous dispatch.
//!
//! ## Contents
//! - [`Event`], [`EventName`] segmented names and JSON payloads
//! - [`Pattern`] compiled subscription patterns with `*` and `**`
//! - [`EventBus`] synchronous pub/sub with per-handler panic isolation
//! - [`Responder`] one-shot reply path carried by an event
//!
//! ## Quick reference
//! - **Owners**: every `Controller`, every service (mirror of the child bus),
//!   the `SystemRouter` root, and the child-side `ServiceRuntime`.
//! - **Across processes**: `rpc::bridge` re-emits events received from the other
//!   side and keeps their reply path.

mod emitter;
mod event;
mod pattern;

pub use emitter::{EventBus, HANDLER_ERROR, Handler, SubscriptionId, WeakEventBus};
pub use event::{DEFAULT_DELIMITER, Event, EventName, Responder, Values};
pub use pattern::Pattern;
