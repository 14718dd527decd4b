//! Cross-process request/response.
//!
//! ## Contents
//! - [`LocalApi`], [`Reply`] functions a side exposes and the handle answering one call
//! - [`RpcSession`], [`RemoteApi`] the per-transport session and the peer proxy
//! - [`bridge`] event forwarding between two [`EventBus`](crate::EventBus)es
//!
//! ## Quick wiring
//! ```text
//! Monitor (per spawn) ─► IpcListener::accept ─► RpcSession::start(transport, bridge::event_api(service bus))
//! ServiceRuntime      ─► connect_from_env    ─► RpcSession::start(transport, service api + bridge)
//! ```

mod api;
pub mod bridge;
mod session;

pub use api::{Function, LocalApi, Reply};
pub use session::{RemoteApi, RpcSession};
