//! # Subsystem trait.
//!
//! A subsystem is one owned domain of the [`SystemRouter`](super::SystemRouter):
//! it has a name (its routing prefix), its own bus, and a start/stop lifecycle.
//! [`Controller`] is the standard implementation.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use apiary::{ControllerError, Event, EventBus, StopOutcome, Subsystem};
//!
//! struct Clock {
//!     bus: EventBus,
//! }
//!
//! #[async_trait]
//! impl Subsystem for Clock {
//!     fn name(&self) -> &str { "clock" }
//!     fn bus(&self) -> &EventBus { &self.bus }
//!
//!     fn handle_event(&self, event: &Event) {
//!         event.respond(vec![serde_json::Value::Null]);
//!     }
//!
//!     async fn start(&self) -> Result<(), ControllerError> { Ok(()) }
//!     async fn stop(&self) -> Vec<StopOutcome> { Vec::new() }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::{Event, EventBus};
use crate::controller::{Controller, StopOutcome};
use crate::error::ControllerError;

/// Shared handle to a subsystem.
pub type SubsystemRef = Arc<dyn Subsystem>;

/// Owned domain routed by its name.
#[async_trait]
pub trait Subsystem: Send + Sync + 'static {
    /// Routing prefix on the root bus. Must be unique within a router.
    fn name(&self) -> &str;

    /// Upward events. The router re-emits them as `log::<name>::…`.
    fn bus(&self) -> &EventBus;

    /// Downward dispatch; the routing prefix is already stripped.
    ///
    /// Called synchronously from the root bus: implementations spawn for async work
    /// and answer through the event's responder.
    fn handle_event(&self, event: &Event);

    async fn start(&self) -> Result<(), ControllerError>;

    /// Stops everything the subsystem owns; one outcome per owned service.
    async fn stop(&self) -> Vec<StopOutcome>;
}

#[async_trait]
impl Subsystem for Controller {
    fn name(&self) -> &str {
        Controller::name(self)
    }

    fn bus(&self) -> &EventBus {
        Controller::bus(self)
    }

    fn handle_event(&self, event: &Event) {
        Controller::handle_event(self, event)
    }

    /// Starts the configured autostart services.
    async fn start(&self) -> Result<(), ControllerError> {
        self.start_autostart().await.map(drop)
    }

    async fn stop(&self) -> Vec<StopOutcome> {
        Controller::stop(self).await
    }
}
