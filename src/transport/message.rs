//! IPC message envelope.
//!
//! One JSON object per line, internally tagged by `kind`:
//!
//! ```text
//! {"kind":"declare","functions":["emit","echo"]}
//! {"kind":"request","function_id":"echo","token":"Qm3…","args":[1,"two"]}
//! {"kind":"response","token":"Qm3…","args":[null,"ok"]}
//! {"kind":"response","token":"Zx9…","args":[],"error":"unknown function `nope`"}
//! ```
//!
//! A request without `token` expects no response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message exchanged over a [`ChannelTransport`](super::ChannelTransport).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// Names of the functions the sender exposes.
    Declare { functions: Vec<String> },

    /// Invocation of a declared function.
    Request {
        function_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default)]
        args: Vec<Value>,
    },

    /// Answer to a request that carried `token`.
    Response {
        token: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Message {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Declare { .. } => "declare",
            Message::Request { .. } => "request",
            Message::Response { .. } => "response",
        }
    }
}
