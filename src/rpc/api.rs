//! Local API table and the reply handle given to each invocation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::bus::Values;
use crate::transport::Message;

/// Function exposed to the remote side.
///
/// Receives the request arguments and a [`Reply`] used to answer, now or later.
pub type Function = Arc<dyn Fn(Values, Reply) + Send + Sync>;

/// Queue item consumed by a session's writer task.
pub(crate) enum Outbound {
    Message(Message),
    Flush(oneshot::Sender<()>),
}

/// Named, flat table of functions a session declares to its peer.
#[derive(Clone, Default)]
pub struct LocalApi {
    functions: HashMap<String, Function>,
}

impl LocalApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) `name`.
    pub fn function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Values, Reply) + Send + Sync + 'static,
    {
        self.insert(name, f);
        self
    }

    pub fn insert<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Values, Reply) + Send + Sync + 'static,
    {
        let f: Function = Arc::new(f);
        self.functions.insert(name.into(), f);
    }

    /// Union of both tables; `other` wins on name clashes.
    pub fn merge(mut self, other: LocalApi) -> Self {
        self.functions.extend(other.functions);
        self
    }

    /// Declared names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }
}

impl fmt::Debug for LocalApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalApi")
            .field("functions", &self.names())
            .finish()
    }
}

/// Answers one request.
///
/// The first [`send`](Reply::send) or [`fail`](Reply::fail) is delivered. A reply dropped
/// unanswered sends an error response, so the caller never waits on a lost answer.
/// Replies to fire-and-forget requests are no-ops.
pub struct Reply {
    token: Option<String>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Reply {
    pub(crate) fn new(token: Option<String>, outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { token, outbound }
    }

    /// Whether the caller waits for an answer.
    pub fn expects_response(&self) -> bool {
        self.token.is_some()
    }

    pub fn send(mut self, args: Values) {
        self.finish(args, None);
    }

    pub fn fail(mut self, error: impl Into<String>) {
        self.finish(Vec::new(), Some(error.into()));
    }

    fn finish(&mut self, args: Values, error: Option<String>) {
        if let Some(token) = self.token.take() {
            let _ = self
                .outbound
                .send(Outbound::Message(Message::Response { token, args, error }));
        }
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        if self.token.is_some() {
            self.finish(Vec::new(), Some("request dropped without a reply".into()));
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply").field("token", &self.token).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Option<Message> {
        match rx.try_recv().ok()? {
            Outbound::Message(m) => Some(m),
            Outbound::Flush(_) => None,
        }
    }

    #[test]
    fn reply_is_sent_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        Reply::new(Some("t".into()), tx).send(vec![json!(1)]);
        assert_eq!(
            response(&mut rx),
            Some(Message::Response {
                token: "t".into(),
                args: vec![json!(1)],
                error: None
            })
        );
        assert!(response(&mut rx).is_none());
    }

    #[test]
    fn dropped_reply_sends_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(Reply::new(Some("t".into()), tx));
        let Some(Message::Response { error, .. }) = response(&mut rx) else {
            panic!("expected a response");
        };
        assert!(error.is_some());
    }

    #[test]
    fn notification_reply_is_silent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reply = Reply::new(None, tx);
        assert!(!reply.expects_response());
        reply.fail("ignored");
        assert!(response(&mut rx).is_none());
    }

    #[test]
    fn names_are_sorted_and_merge_overrides() {
        let a = LocalApi::new().function("b", |_, r| r.send(vec![])).function("a", |_, r| r.send(vec![]));
        let b = LocalApi::new().function("c", |_, r| r.send(vec![]));
        assert_eq!(a.merge(b).names(), ["a", "b", "c"]);
    }
}
