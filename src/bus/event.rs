//! # Hierarchical events.
//!
//! An [`Event`] is a segmented [`EventName`] plus an ordered JSON payload.
//! Names are parsed once (split by the delimiter, `"::"` by default) and routed
//! by segment, never by string surgery.
//!
//! An event may carry a [`Responder`]: the single reply path back to whoever
//! emitted it. Handlers that finish their work asynchronously clone the event
//! into a task and answer later; the first answer wins.
//!
//! ## Example
//! ```rust
//! use apiary::{Event, EventName};
//! use serde_json::json;
//!
//! let ev = Event::new("sre::alice::app::start", vec![json!({"app": "blog"})]);
//! assert_eq!(ev.name.segments(), ["sre", "alice", "app", "start"]);
//!
//! let (head, rest) = ev.name.split_first().unwrap();
//! assert_eq!(head, "sre");
//! assert_eq!(rest, EventName::from("alice::app::start"));
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;

/// Default segment delimiter.
pub const DEFAULT_DELIMITER: &str = "::";

/// Ordered event payload.
pub type Values = Vec<Value>;

/// Segmented event name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct EventName {
    segments: Vec<String>,
}

impl EventName {
    /// Builds a name from already split segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Splits `name` by `delimiter`. An empty string yields an empty name.
    pub fn parse(name: &str, delimiter: &str) -> Self {
        if name.is_empty() {
            return Self::default();
        }
        Self::new(name.split(delimiter))
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Leading segment, if any.
    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// Splits off the leading segment.
    pub fn split_first(&self) -> Option<(&str, EventName)> {
        let (head, rest) = self.segments.split_first()?;
        Some((head.as_str(), EventName::new(rest.iter().cloned())))
    }

    /// Returns a new name with `head` in front.
    pub fn prefixed(&self, head: impl Into<String>) -> EventName {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.push(head.into());
        segments.extend(self.segments.iter().cloned());
        EventName { segments }
    }

    /// Joins the segments with `delimiter`.
    pub fn join(&self, delimiter: &str) -> String {
        self.segments.join(delimiter)
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join(DEFAULT_DELIMITER))
    }
}

impl From<&str> for EventName {
    fn from(name: &str) -> Self {
        EventName::parse(name, DEFAULT_DELIMITER)
    }
}

impl From<String> for EventName {
    fn from(name: String) -> Self {
        EventName::parse(&name, DEFAULT_DELIMITER)
    }
}

impl<const N: usize> From<[&str; N]> for EventName {
    fn from(segments: [&str; N]) -> Self {
        EventName::new(segments)
    }
}

impl From<Vec<String>> for EventName {
    fn from(segments: Vec<String>) -> Self {
        EventName { segments }
    }
}

type ReplyFn = Box<dyn FnOnce(Values) + Send>;

/// One-shot reply path attached to an event.
///
/// Cloning shares the same slot; only the first [`respond`](Responder::respond) is delivered.
/// When the last clone is dropped unanswered, the wrapped callback is dropped with it
/// (the RPC layer turns that into an error reply).
#[derive(Clone)]
pub struct Responder {
    slot: Arc<Mutex<Option<ReplyFn>>>,
}

impl Responder {
    /// Wraps a reply callback.
    pub fn new<F>(reply: F) -> Self
    where
        F: FnOnce(Values) + Send + 'static,
    {
        Self {
            slot: Arc::new(Mutex::new(Some(Box::new(reply)))),
        }
    }

    /// Creates a responder that delivers into a oneshot channel.
    pub fn channel() -> (Self, oneshot::Receiver<Values>) {
        let (tx, rx) = oneshot::channel();
        let responder = Responder::new(move |values| {
            let _ = tx.send(values);
        });
        (responder, rx)
    }

    /// Delivers `values`. Returns `false` if a reply was already sent.
    pub fn respond(&self, values: Values) -> bool {
        let reply = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match reply {
            Some(reply) => {
                reply(values);
                true
            }
            None => false,
        }
    }

    /// Whether a reply has been delivered.
    pub fn is_spent(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("spent", &self.is_spent())
            .finish()
    }
}

/// Event carried by an [`EventBus`](crate::EventBus).
#[derive(Clone, Debug)]
pub struct Event {
    /// Segmented name.
    pub name: EventName,
    /// Ordered payload values.
    pub payload: Values,
    responder: Option<Responder>,
}

impl Event {
    /// Creates an event without reply path.
    pub fn new(name: impl Into<EventName>, payload: Values) -> Self {
        Self {
            name: name.into(),
            payload,
            responder: None,
        }
    }

    /// Attaches a reply path.
    #[inline]
    pub fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Same event (payload and reply path) under another name.
    #[inline]
    pub fn renamed(mut self, name: impl Into<EventName>) -> Self {
        self.name = name.into();
        self
    }

    pub fn responder(&self) -> Option<&Responder> {
        self.responder.as_ref()
    }

    /// Whether the emitter waits for an answer.
    pub fn wants_reply(&self) -> bool {
        self.responder.as_ref().is_some_and(|r| !r.is_spent())
    }

    /// Answers the emitter. Returns `false` if there is no reply path or it was used.
    pub fn respond(&self, values: Values) -> bool {
        self.responder.as_ref().is_some_and(|r| r.respond(values))
    }

    /// Payload value at `index`, or `Null`.
    pub fn arg(&self, index: usize) -> &Value {
        self.payload.get(index).unwrap_or(&Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_and_join_roundtrip_with_custom_delimiter() {
        let name = EventName::parse("a.b.c", ".");
        assert_eq!(name.segments(), ["a", "b", "c"]);
        assert_eq!(name.join("/"), "a/b/c");
        assert_eq!(name.to_string(), "a::b::c");
    }

    #[test]
    fn empty_name_has_no_segments() {
        assert!(EventName::from("").is_empty());
        assert!(EventName::from("").split_first().is_none());
    }

    #[test]
    fn prefixed_puts_head_first() {
        let name = EventName::from("exit").prefixed("alice");
        assert_eq!(name, EventName::from(["alice", "exit"]));
    }

    #[tokio::test]
    async fn responder_delivers_only_once() {
        let (responder, rx) = Responder::channel();
        let ev = Event::new("ping", vec![]).with_responder(responder);
        let copy = ev.clone();

        assert!(ev.wants_reply());
        assert!(copy.respond(vec![json!(1)]));
        assert!(!ev.respond(vec![json!(2)]));
        assert!(!ev.wants_reply());
        assert_eq!(rx.await.unwrap(), vec![json!(1)]);
    }

    #[test]
    fn respond_without_reply_path_is_noop() {
        let ev = Event::new("ping", vec![]);
        assert!(!ev.wants_reply());
        assert!(!ev.respond(vec![]));
        assert_eq!(ev.arg(0), &Value::Null);
    }
}
