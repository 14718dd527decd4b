//! Channel between the master and one child process.
//!
//! ## Contents
//! - [`Message`] the declare/request/response envelope
//! - [`ChannelTransport`] newline-delimited JSON framing over any byte stream
//! - [`IpcListener`], [`connect_from_env`] per-spawn Unix socket rendezvous

mod channel;
mod ipc;
mod message;

pub use channel::{ChannelTransport, MAX_FRAME_LEN, TransportReader, TransportWriter};
pub use ipc::{IPC_SOCKET_ENV, IpcListener, connect, connect_from_env};
pub use message::Message;
