//! Event bridging between two buses over an [`RpcSession`](super::RpcSession).
//!
//! Both sides declare [`EMIT_FUNCTION`]; its arguments are `[segments, payload]`.
//!
//! ```text
//! parent bus                                       child bus
//!   forward(event)  ── notify emit [name, args] ──►  bus.emit(event)
//!   request(event)  ── call   emit [name, args] ──►  bus.emit(event + Responder)
//!        ▲                                                  │
//!        └──────────── response {token, values} ◄── event.respond(values)
//! ```
//!
//! Replies follow the error-first convention: `[null, results…]` or `[error]`.

use serde_json::Value;

use super::api::{LocalApi, Reply};
use super::session::RemoteApi;
use crate::bus::{Event, EventBus, EventName, Responder, Values};
use crate::error::RpcError;

/// Function both ends declare to receive bridged events.
pub const EMIT_FUNCTION: &str = "emit";

/// Local API re-emitting every bridged event on `bus`.
///
/// Requests that expect a response get a [`Responder`] wired to the RPC reply.
pub fn event_api(bus: EventBus) -> LocalApi {
    LocalApi::new().function(EMIT_FUNCTION, move |args, reply: Reply| {
        let (name, payload) = match decode(args) {
            Ok(decoded) => decoded,
            Err(e) => return reply.fail(e),
        };
        let mut event = Event::new(name, payload);
        if reply.expects_response() {
            event = event.with_responder(Responder::new(move |values| reply.send(values)));
        }
        bus.emit(event);
    })
}

/// Sends `event` to the peer bus without waiting.
pub fn forward(remote: &RemoteApi, event: &Event) -> Result<(), RpcError> {
    remote.notify(EMIT_FUNCTION, encode(event))
}

/// Sends `event` to the peer bus and waits for the handler's reply.
pub async fn request(remote: &RemoteApi, event: &Event) -> Result<Values, RpcError> {
    remote.call(EMIT_FUNCTION, encode(event)).await
}

/// `[null, results…]`
pub fn ok_reply(results: Values) -> Values {
    std::iter::once(Value::Null).chain(results).collect()
}

/// `[error]`
pub fn err_reply(error: impl ToString) -> Values {
    vec![Value::String(error.to_string())]
}

/// Splits an error-first reply into its results or its error text.
pub fn split_reply(mut values: Values) -> Result<Values, String> {
    if values.is_empty() {
        return Ok(values);
    }
    match values.remove(0) {
        Value::Null => Ok(values),
        Value::String(e) => Err(e),
        other => Err(other.to_string()),
    }
}

fn encode(event: &Event) -> Values {
    let segments = event
        .name
        .segments()
        .iter()
        .cloned()
        .map(Value::String)
        .collect();
    vec![Value::Array(segments), Value::Array(event.payload.clone())]
}

fn decode(mut args: Values) -> Result<(EventName, Values), String> {
    if args.len() != 2 {
        return Err(format!("expected [name, payload], got {} argument(s)", args.len()));
    }
    let payload = match args.pop() {
        Some(Value::Array(payload)) => payload,
        _ => return Err("payload must be an array".into()),
    };
    let segments = match args.pop() {
        Some(Value::Array(segments)) => segments,
        Some(Value::String(name)) => return Ok((EventName::from(name), payload)),
        _ => return Err("name must be an array of segments".into()),
    };
    let segments = segments
        .into_iter()
        .map(|s| match s {
            Value::String(s) => Ok(s),
            other => Err(format!("segment must be a string, got {other}")),
        })
        .collect::<Result<Vec<String>, String>>()?;
    Ok((EventName::from(segments), payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RpcSession;
    use crate::transport::ChannelTransport;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn forwarded_events_land_on_peer_bus() {
        let (a, b) = ChannelTransport::pair();
        let child_bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        child_bus.on("app::**", move |ev| {
            s.lock().unwrap().push((ev.name.to_string(), ev.payload.clone()));
        });

        let parent = RpcSession::start("parent", a, event_api(EventBus::new()));
        let _child = RpcSession::start("child", b, event_api(child_bus));
        let remote = parent.ready().await.unwrap();

        forward(&remote, &Event::new("app::start", vec![json!({"app": "blog"})])).unwrap();
        // requests are served in order: once this one is answered the notify was handled
        request(&remote, &Event::new("ping", vec![])).await.unwrap_err();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("app::start".to_string(), vec![json!({"app": "blog"})])]
        );
    }

    #[tokio::test]
    async fn request_returns_handler_reply() {
        let (a, b) = ChannelTransport::pair();
        let child_bus = EventBus::new();
        child_bus.on("stop", |ev| {
            let ev = ev.clone();
            tokio::spawn(async move {
                ev.respond(ok_reply(vec![json!("bye")]));
            });
        });

        let parent = RpcSession::start("parent", a, LocalApi::new());
        let _child = RpcSession::start("child", b, event_api(child_bus));
        let remote = parent.ready().await.unwrap();

        let reply = request(&remote, &Event::new("stop", vec![])).await.unwrap();
        assert_eq!(split_reply(reply), Ok(vec![json!("bye")]));
    }

    #[tokio::test]
    async fn unhandled_request_fails_instead_of_hanging() {
        let (a, b) = ChannelTransport::pair();
        let parent = RpcSession::start("parent", a, LocalApi::new());
        let _child = RpcSession::start("child", b, event_api(EventBus::new()));
        let remote = parent.ready().await.unwrap();

        assert!(matches!(
            request(&remote, &Event::new("nobody::home", vec![])).await,
            Err(RpcError::Remote(_))
        ));
    }

    #[test]
    fn error_first_helpers() {
        assert_eq!(ok_reply(vec![json!(1)]), vec![Value::Null, json!(1)]);
        assert_eq!(split_reply(err_reply("boom")), Err("boom".to_string()));
        assert_eq!(split_reply(vec![json!({"code": 1})]), Err(r#"{"code":1}"#.to_string()));
        assert_eq!(split_reply(vec![]), Ok(vec![]));
    }

    #[test]
    fn decode_accepts_segments_or_joined_name() {
        let (name, payload) = decode(vec![json!(["a", "b"]), json!([1])]).unwrap();
        assert_eq!(name, EventName::from("a::b"));
        assert_eq!(payload, vec![json!(1)]);

        let (name, _) = decode(vec![json!("x::y"), json!([])]).unwrap();
        assert_eq!(name.segments(), ["x", "y"]);

        assert!(decode(vec![json!([1]), json!([])]).is_err());
        assert!(decode(vec![json!(["a"])]).is_err());
    }
}
