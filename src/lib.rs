//! # apiary
//!
//! **Apiary** is a multi-tenant process orchestrator.
//!
//! A master process supervises many worker processes, talks to each of them over
//! a correlated request/response channel, and connects everything through a
//! hierarchical, wildcard-capable event bus.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                     ┌──────────────────────────────────────────┐
//!  root EventBus ───► │ SystemRouter                             │
//!  "<sub>::…"         │  on_any: route by leading segment        │
//!                     └──────┬───────────────┬───────────────┬───┘
//!                            ▼               ▼               ▼
//!                     ┌────────────┐  ┌─────────────┐  ┌──────────┐
//!                     │ serviceEnv │  │ resourceEnv │  │  apiEnv  │   Controller
//!                     └─────┬──────┘  └──────┬──────┘  └────┬─────┘   (one per subsystem)
//!                           ▼                ▼              ▼
//!                     ┌───────────────────────────────────────────┐
//!                     │ ServiceHandle "<name>"                    │
//!                     │  Monitor ── spawn / restart / stop ──► OS │
//!                     │  RpcSession ◄── ChannelTransport ──► child│
//!                     │  mirror EventBus (bridged child events)   │
//!                     └───────────────────────────────────────────┘
//!
//!  upward:   child emit "x" ─► "<name>::x" ─► "log::<sub>::<name>::x" on the root bus
//!  downward: root "<sub>::<name>::x" ─► child bus "x"
//! ```
//!
//! ### Lifecycle of one service
//! ```text
//! start_service(opts) ──► Monitor::start() ──► child connects ──► RpcSession
//!     ──► request "start" [service_options] ──► [null, …] ──► "<name>::running"
//!
//! child exits ──► RestartPolicy::decide()
//!     ├─ RestartNow / RestartAfter(d) ──► "<name>::restart", new session, new handshake
//!     └─ Exited / Stopped             ──► "<name>::exit" {spinning}
//!
//! stop_service(name, timeout) ──► request "stop" ──► reply | Timeout
//!     ──► SIGTERM (SIGKILL after kill_timeout) ──► unregistered ──► "<name>::stopped"
//! ```
//!
//! ## Features
//! | Area              | Description                                                       | Key types / traits                         |
//! |-------------------|-------------------------------------------------------------------|--------------------------------------------|
//! | **Events**        | Segmented names, `*`/`**` patterns, reply paths.                   | [`EventBus`], [`Event`], [`Pattern`]       |
//! | **Transport**     | Newline-delimited JSON over a per-spawn Unix socket.               | [`ChannelTransport`], [`Message`]          |
//! | **RPC**           | Declared functions, token-correlated calls, event bridging.        | [`RpcSession`], [`LocalApi`], [`RemoteApi`] |
//! | **Supervision**   | Spawn, output pumping, spin detection, restart, graceful stop.     | [`Monitor`], [`RestartPolicy`]             |
//! | **Services**      | Named registry with start/stop handshakes.                        | [`Controller`], [`ServiceHandle`]          |
//! | **Routing**       | Subsystems under one root bus, ordered start/stop.                | [`SystemRouter`], [`Orchestrator`]         |
//! | **Child runtime** | What a supervised binary links against.                           | [`Service`], [`ServiceRuntime`]            |
//!
//! ## Example
//! ```no_run
//! use apiary::{Config, Orchestrator, ServiceOptions};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.subsystems[0]
//!         .services
//!         .insert("proxy".into(), "/usr/local/bin/proxy".into());
//!
//!     let orch = Orchestrator::new(config)?;
//!     orch.start().await?;
//!
//!     let env = orch.controller("serviceEnv").ok_or("serviceEnv is not configured")?;
//!     let proxy = env.start_service(ServiceOptions::new("proxy").name("proxy")).await?;
//!     println!("proxy running as pid {:?}", proxy.pid());
//!
//!     orch.shutdown().await?;
//!     Ok(())
//! }
//! ```
mod bus;
mod config;
mod controller;
mod error;
mod lifecycle;
mod monitor;
mod rpc;
mod service;
mod system;
mod token;
mod transport;

pub mod logging;
pub mod shutdown;

// ---- Public re-exports ----

pub use bus::{
    DEFAULT_DELIMITER, Event, EventBus, EventName, HANDLER_ERROR, Handler, Pattern, Responder,
    SubscriptionId, Values, WeakEventBus,
};
pub use config::{Config, ConfigStore, DEFAULT_SUBSYSTEMS, LoggingConfig};
pub use controller::{
    Controller, ControllerConfig, MANAGEMENT_PREFIX, START_EVENT, STOP_EVENT, ServiceHandle,
    ServiceOptions, StopOutcome,
};
pub use error::{
    ConfigError, ControllerError, MonitorError, RpcError, SpawnError, SystemError, TransportError,
};
pub use lifecycle::{LifecycleBus, LifecycleEvent, LifecycleKind, LifecycleReceiver};
pub use monitor::{
    ExitContext, ExitDecision, IpcOptions, Monitor, MonitorOptions, MonitorState, ProcessInfo,
    ProcessSpec, RestartPolicy,
};
pub use rpc::{Function, LocalApi, RemoteApi, Reply, RpcSession, bridge};
pub use service::{BoxError, Service, ServiceRuntime};
pub use system::{LOG_PREFIX, Orchestrator, Subsystem, SubsystemRef, SystemRouter};
pub use transport::{
    ChannelTransport, IPC_SOCKET_ENV, IpcListener, MAX_FRAME_LEN, Message, TransportReader,
    TransportWriter, connect, connect_from_env,
};
