//! # Request/response session over one transport.
//!
//! [`RpcSession`] runs the symmetric protocol on both ends of a [`ChannelTransport`]:
//!
//! ```text
//! start()
//!   ├─► send Declare{local names}                  (first message, once)
//!   ├─► writer task: outbound queue ──► transport
//!   └─► reader task: transport ──► dispatch
//!          ├─ Declare   → remote = RemoteApi{names}, ready() resolves
//!          ├─ Request   → local function(args, Reply)
//!          └─ Response  → pending.remove(token) → resolve caller
//!
//! call(fn, args)
//!   token = random
//!   pending[token] = oneshot
//!   send Request{fn, token, args}  ──►  … ──►  Response{token, result}
//! ```
//!
//! ## Rules
//! - Responses are matched by token only; completion order is arbitrary.
//! - Unmatched or duplicate tokens are ignored.
//! - A message over the frame limit is not written: a call fails with
//!   [`RpcError::Rejected`], a response becomes an error response. The session stays up.
//! - [`close`](RpcSession::close) is synchronous: every pending call resolves with
//!   [`RpcError::SessionClosed`] before it returns. Transport EOF and write
//!   failures close the session the same way.
//! - Nothing is retried.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::api::{LocalApi, Outbound, Reply};
use crate::bus::Values;
use crate::error::{RpcError, TransportError};
use crate::token::correlation_token;
use crate::transport::{ChannelTransport, Message, TransportReader, TransportWriter};

static SESSION_SEQ: AtomicU64 = AtomicU64::new(1);

type Waiter = oneshot::Sender<Result<Values, RpcError>>;

struct Inner {
    id: u64,
    label: Arc<str>,
    outbound: mpsc::UnboundedSender<Outbound>,
    pending: Mutex<HashMap<String, Waiter>>,
    remote: watch::Sender<Option<RemoteApi>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

/// One side of the RPC protocol. Cheap to clone.
#[derive(Clone)]
pub struct RpcSession {
    inner: Arc<Inner>,
}

/// Callable proxy for the functions the peer declared.
#[derive(Clone)]
pub struct RemoteApi {
    functions: Arc<HashSet<String>>,
    session: Weak<Inner>,
}

impl RpcSession {
    /// Starts a session on `transport`, declaring `api` to the peer.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(label: impl Into<Arc<str>>, transport: ChannelTransport, api: LocalApi) -> Self {
        let (reader, writer) = transport.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let (remote, _) = watch::channel(None);

        let inner = Arc::new(Inner {
            id: SESSION_SEQ.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
            outbound: tx,
            pending: Mutex::new(HashMap::new()),
            remote,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });

        let _ = inner.outbound.send(Outbound::Message(Message::Declare {
            functions: api.names(),
        }));
        tokio::spawn(write_loop(Arc::clone(&inner), writer, rx));
        tokio::spawn(read_loop(Arc::clone(&inner), reader, api));

        debug!(session = %inner.label, id = inner.id, "rpc session started");
        Self { inner }
    }

    /// Process-unique session id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Peer API, if its declaration already arrived.
    pub fn remote(&self) -> Option<RemoteApi> {
        if self.is_closed() {
            return None;
        }
        self.inner.remote.borrow().clone()
    }

    /// Waits for the peer declaration.
    pub async fn ready(&self) -> Result<RemoteApi, RpcError> {
        let mut rx = self.inner.remote.subscribe();
        loop {
            if self.is_closed() {
                return Err(RpcError::SessionClosed);
            }
            if let Some(remote) = rx.borrow_and_update().clone() {
                return Ok(remote);
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(RpcError::SessionClosed);
                    }
                }
                _ = self.inner.cancel.cancelled() => return Err(RpcError::SessionClosed),
            }
        }
    }

    /// Completes once the session is closed.
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await
    }

    /// Waits until every message queued so far has been written.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.inner.outbound.send(Outbound::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Tears the session down, failing every pending call. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl fmt::Debug for RpcSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcSession")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RemoteApi {
    /// Declared names, sorted.
    pub fn functions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().cloned().collect();
        names.sort();
        names
    }

    pub fn has(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    /// Invokes `name` and waits for its response.
    pub async fn call(&self, name: &str, args: Values) -> Result<Values, RpcError> {
        let inner = self.checked(name)?;
        inner.call(name, args).await
    }

    /// Invokes `name` without waiting for (or expecting) a response.
    pub fn notify(&self, name: &str, args: Values) -> Result<(), RpcError> {
        let inner = self.checked(name)?;
        inner.send(Message::Request {
            function_id: name.to_string(),
            token: None,
            args,
        })
    }

    fn checked(&self, name: &str) -> Result<Arc<Inner>, RpcError> {
        if !self.has(name) {
            return Err(RpcError::UnknownFunction(name.to_string()));
        }
        self.session.upgrade().ok_or(RpcError::SessionClosed)
    }
}

impl fmt::Debug for RemoteApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteApi")
            .field("functions", &self.functions())
            .finish()
    }
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn send(&self, msg: Message) -> Result<(), RpcError> {
        if self.is_closed() {
            return Err(RpcError::SessionClosed);
        }
        self.outbound
            .send(Outbound::Message(msg))
            .map_err(|_| RpcError::SessionClosed)
    }

    async fn call(&self, name: &str, args: Values) -> Result<Values, RpcError> {
        let token = correlation_token();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(token.clone(), tx);

        // close() flips the flag before draining; re-check after registering.
        if self.is_closed() {
            lock(&self.pending).remove(&token);
            return Err(RpcError::SessionClosed);
        }
        let sent = self.send(Message::Request {
            function_id: name.to_string(),
            token: Some(token.clone()),
            args,
        });
        if let Err(e) = sent {
            lock(&self.pending).remove(&token);
            return Err(e);
        }
        trace!(session = %self.label, function = name, %token, "call sent");
        rx.await.unwrap_or(Err(RpcError::SessionClosed))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let waiters: Vec<Waiter> = lock(&self.pending).drain().map(|(_, w)| w).collect();
        let failed = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(Err(RpcError::SessionClosed));
        }
        debug!(session = %self.label, id = self.id, failed, "rpc session closed");
    }

    /// Settles a message that could not be written.
    ///
    /// A correlated request fails its own caller; a response is replaced by an
    /// error response so the peer's caller does not wait forever.
    fn reject(&self, msg: Message, error: &TransportError) -> Option<Message> {
        match msg {
            Message::Request {
                token: Some(token), ..
            } => {
                if let Some(waiter) = lock(&self.pending).remove(&token) {
                    let _ = waiter.send(Err(RpcError::Rejected(error.to_string())));
                }
                None
            }
            Message::Response { token, .. } => Some(Message::Response {
                token,
                args: Vec::new(),
                error: Some(error.to_string()),
            }),
            Message::Request { .. } | Message::Declare { .. } => None,
        }
    }

    fn dispatch(self: &Arc<Self>, msg: Message, api: &LocalApi) {
        match msg {
            Message::Declare { functions } => {
                debug!(session = %self.label, ?functions, "remote api declared");
                let remote = RemoteApi {
                    functions: Arc::new(functions.into_iter().collect()),
                    session: Arc::downgrade(self),
                };
                self.remote.send_replace(Some(remote));
            }
            Message::Request {
                function_id,
                token,
                args,
            } => {
                let reply = Reply::new(token, self.outbound.clone());
                let Some(function) = api.get(&function_id) else {
                    warn!(session = %self.label, function = %function_id, "unknown function requested");
                    reply.fail(format!("unknown function `{function_id}`"));
                    return;
                };
                let function = Arc::clone(function);
                if panic::catch_unwind(AssertUnwindSafe(|| function(args, reply))).is_err() {
                    warn!(session = %self.label, function = %function_id, "local function panicked");
                }
            }
            Message::Response { token, args, error } => {
                let waiter = lock(&self.pending).remove(&token);
                match waiter {
                    Some(waiter) => {
                        let result = match error {
                            Some(e) => Err(RpcError::Remote(e)),
                            None => Ok(args),
                        };
                        let _ = waiter.send(result);
                    }
                    None => trace!(session = %self.label, %token, "ignoring unmatched response"),
                }
            }
        }
    }
}

async fn write_loop(
    inner: Arc<Inner>,
    mut writer: TransportWriter,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    loop {
        let next = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            next = rx.recv() => next,
        };
        match next {
            Some(Outbound::Message(msg)) => match writer.send(&msg).await {
                Ok(()) => {}
                Err(e) if !e.is_fatal() => {
                    warn!(session = %inner.label, error = %e, kind = msg.kind(), "message rejected");
                    if let Some(answer) = inner.reject(msg, &e) {
                        if let Err(e) = writer.send(&answer).await {
                            warn!(session = %inner.label, error = %e, "write failed");
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(session = %inner.label, error = %e, kind = msg.kind(), "write failed");
                    break;
                }
            },
            Some(Outbound::Flush(ack)) => {
                let _ = ack.send(());
            }
            None => break,
        }
    }
    inner.close();
}

async fn read_loop(inner: Arc<Inner>, mut reader: TransportReader, api: LocalApi) {
    loop {
        let next = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            next = reader.recv() => next,
        };
        match next {
            None => {
                debug!(session = %inner.label, "transport closed by peer");
                break;
            }
            Some(Err(e)) if e.is_fatal() => {
                warn!(session = %inner.label, error = %e, "transport failed");
                break;
            }
            Some(Err(e)) => {
                warn!(session = %inner.label, error = %e, label = e.as_label(), "dropping malformed message");
            }
            Some(Ok(msg)) => inner.dispatch(msg, &api),
        }
    }
    inner.close();
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
