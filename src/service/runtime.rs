//! # Child-side runtime.
//!
//! [`ServiceRuntime`] is what a supervised child runs: it connects back to the
//! master, answers the lifecycle handshakes with the [`Service`] implementation,
//! and bridges every other event onto a local [`EventBus`].
//!
//! ## Protocol
//! ```text
//! master                                   child (ServiceRuntime)
//!   request "start" [service_options] ──►  service.start(options) ──► [null, …] | [error]
//!   request "stop"  []                ──►  service.stop()         ──► [null] | [error]
//!                                          run() returns once the reply is flushed
//!   "<anything>"                      ──►  bus().emit(...)
//!   "<name>::<event>" on the master   ◄──  emit(event) / request(event)
//! ```

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{Event, EventBus, Values};
use crate::controller::{START_EVENT, STOP_EVENT};
use crate::error::{RpcError, TransportError};
use crate::rpc::{LocalApi, RpcSession, bridge};
use crate::transport::{ChannelTransport, connect_from_env};

/// Error a [`Service`] reports back to the master.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Behaviour of a supervised child.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Answers the start handshake. `options` is the `service_options` the master was given.
    ///
    /// The returned values travel back as the results of the handshake.
    async fn start(&self, options: Value) -> Result<Values, BoxError>;

    /// Answers the stop handshake. The runtime exits once the reply is written.
    async fn stop(&self) -> Result<(), BoxError>;

    /// Extra functions declared to the master next to the event bridge.
    fn api(&self) -> LocalApi {
        LocalApi::new()
    }
}

/// Connection of one child to its master. Cheap to clone.
#[derive(Clone)]
pub struct ServiceRuntime {
    session: RpcSession,
    bus: EventBus,
    stopped: CancellationToken,
}

impl ServiceRuntime {
    /// Connects to the socket announced in [`IPC_SOCKET_ENV`](crate::IPC_SOCKET_ENV).
    pub async fn connect(service: Arc<dyn Service>) -> Result<Self, TransportError> {
        let transport = connect_from_env().await?;
        Ok(Self::with_transport(service, transport))
    }

    /// Starts the runtime on an already connected transport.
    ///
    /// Must be called inside a tokio runtime.
    pub fn with_transport(service: Arc<dyn Service>, transport: ChannelTransport) -> Self {
        let bus = EventBus::new();
        let stopped = CancellationToken::new();

        let svc = Arc::clone(&service);
        bus.on(START_EVENT, move |ev| {
            let (svc, ev) = (Arc::clone(&svc), ev.clone());
            tokio::spawn(async move {
                let reply = match svc.start(ev.arg(0).clone()).await {
                    Ok(results) => {
                        info!(pid = std::process::id(), "service started");
                        bridge::ok_reply(results)
                    }
                    Err(e) => {
                        warn!(error = %e, "service refused to start");
                        bridge::err_reply(e)
                    }
                };
                ev.respond(reply);
            });
        });

        let svc = Arc::clone(&service);
        let done = stopped.clone();
        bus.on(STOP_EVENT, move |ev| {
            let (svc, ev, done) = (Arc::clone(&svc), ev.clone(), done.clone());
            tokio::spawn(async move {
                let reply = match svc.stop().await {
                    Ok(()) => bridge::ok_reply(Vec::new()),
                    Err(e) => {
                        warn!(error = %e, "service failed to stop cleanly");
                        bridge::err_reply(e)
                    }
                };
                ev.respond(reply);
                done.cancel();
            });
        });

        let api = bridge::event_api(bus.clone()).merge(service.api());
        let label = format!("service-{}", std::process::id());
        let session = RpcSession::start(label, transport, api);
        Self {
            session,
            bus,
            stopped,
        }
    }

    /// Bridged events from the master land here.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn session(&self) -> &RpcSession {
        &self.session
    }

    /// Sends `event` to the master without waiting.
    pub async fn emit(&self, event: &Event) -> Result<(), RpcError> {
        let remote = self.session.ready().await?;
        bridge::forward(&remote, event)
    }

    /// Sends `event` to the master and waits for the reply.
    pub async fn request(&self, event: &Event) -> Result<Values, RpcError> {
        let remote = self.session.ready().await?;
        bridge::request(&remote, event).await
    }

    /// Whether the stop handshake was answered.
    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Runs until the stop handshake is answered or the master goes away.
    pub async fn run(&self) {
        tokio::select! {
            _ = self.stopped.cancelled() => {
                self.session.flush().await;
                debug!("stop reply flushed");
            }
            _ = self.session.closed() => {
                debug!("master disconnected");
            }
        }
        self.session.close();
    }
}
