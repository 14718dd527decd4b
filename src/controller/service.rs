//! Registry entry of one running service.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use super::config::ServiceOptions;
use crate::bus::{Event, EventBus, Values};
use crate::error::RpcError;
use crate::monitor::Monitor;
use crate::rpc::{RemoteApi, RpcSession, bridge};

pub(crate) struct ServiceEntry {
    pub name: String,
    pub options: ServiceOptions,
    pub monitor: Monitor,
    /// Mirror of the child bus: bridged events from the child land here.
    pub bus: EventBus,
    /// Set by the first `stop_service`; a second one fails fast.
    pub stopping: AtomicBool,
    /// Ends the session driver.
    pub driver: CancellationToken,
}

/// Handle to a service registered in a [`Controller`](crate::Controller). Cheap to clone.
#[derive(Clone)]
pub struct ServiceHandle {
    pub(crate) entry: Arc<ServiceEntry>,
}

impl ServiceHandle {
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn service_type(&self) -> &str {
        &self.entry.options.service_type
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.entry.options
    }

    pub fn monitor(&self) -> &Monitor {
        &self.entry.monitor
    }

    /// Events the child emitted towards the parent.
    pub fn bus(&self) -> &EventBus {
        &self.entry.bus
    }

    pub fn pid(&self) -> Option<u32> {
        self.entry.monitor.info().map(|i| i.pid)
    }

    pub fn is_stopping(&self) -> bool {
        self.entry.stopping.load(Ordering::SeqCst)
    }

    pub fn session(&self) -> Option<RpcSession> {
        self.entry.monitor.session()
    }

    /// Child API, once the current process declared it.
    pub fn remote(&self) -> Option<RemoteApi> {
        self.session()?.remote()
    }

    /// Forwards `event` to the child bus without waiting.
    pub fn emit(&self, event: &Event) -> Result<(), RpcError> {
        let remote = self.remote().ok_or(RpcError::SessionClosed)?;
        bridge::forward(&remote, event)
    }

    /// Forwards `event` to the child bus and waits for the handler's reply.
    pub async fn request(&self, event: &Event) -> Result<Values, RpcError> {
        let remote = self.remote().ok_or(RpcError::SessionClosed)?;
        bridge::request(&remote, event).await
    }

    /// JSON summary used by `service::get` and `service::list`.
    pub fn summary(&self) -> Value {
        let monitor = &self.entry.monitor;
        json!({
            "name": self.name(),
            "type": self.service_type(),
            "state": monitor.state().as_label(),
            "pid": self.pid(),
            "restart_count": monitor.restart_count(),
            "connected": self.remote().is_some(),
        })
    }

    pub(crate) fn same(&self, other: &ServiceHandle) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("name", &self.entry.name)
            .field("type", &self.entry.options.service_type)
            .field("monitor", &self.entry.monitor)
            .finish()
    }
}
