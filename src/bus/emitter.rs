//! # Synchronous hierarchical event bus.
//!
//! [`EventBus`] dispatches an [`Event`] to every subscription whose [`Pattern`]
//! matches its name, on the emitter's own call stack.
//!
//! ## Architecture
//! ```text
//! emit(event)
//!     │
//!     ├──► snapshot onAny handlers
//!     ├──► snapshot matching subscriptions (once-subscriptions removed here)
//!     │
//!     ├──► any_1(event) … any_n(event)
//!     └──► sub_1(event) … sub_m(event)        (registration order)
//!              └── panic → error::handler [name, message]
//! ```
//!
//! ## Rules
//! - **Synchronous**: `emit()` returns after every handler ran.
//! - **Re-entrant**: handlers may `emit`, `on`, `off` freely; changes apply to the next emit.
//! - **Isolation**: a panicking handler is caught; the others still run.
//! - **No queueing**: handlers with async work spawn it and answer through the event's responder.
//!
//! **Warning**: `AssertUnwindSafe` is used, which can leave shared state inconsistent
//! if a handler panics while holding a lock.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::json;
use tokio::sync::oneshot;
use tracing::error;

use super::event::{DEFAULT_DELIMITER, Event, EventName, Responder, Values};
use super::pattern::Pattern;

/// Name of the event emitted when a handler panics.
pub const HANDLER_ERROR: [&str; 2] = ["error", "handler"];

/// Event handler.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by every registration, used by [`EventBus::off`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    pattern: Pattern,
    handler: Handler,
    once: bool,
}

struct Inner {
    delimiter: Box<str>,
    next_id: AtomicU64,
    subs: Mutex<Vec<Subscription>>,
    any: Mutex<Vec<(SubscriptionId, Handler)>>,
}

/// Hierarchical, wildcard-capable publish/subscribe bus.
///
/// Cheap to clone; clones share subscriptions.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

/// Non-owning handle to an [`EventBus`].
#[derive(Clone)]
pub struct WeakEventBus {
    inner: Weak<Inner>,
}

impl WeakEventBus {
    pub fn upgrade(&self) -> Option<EventBus> {
        self.inner.upgrade().map(|inner| EventBus { inner })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus using the `"::"` delimiter.
    pub fn new() -> Self {
        Self::with_delimiter(DEFAULT_DELIMITER)
    }

    /// Creates a bus parsing names and patterns with `delimiter`.
    pub fn with_delimiter(delimiter: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                delimiter: delimiter.into(),
                next_id: AtomicU64::new(1),
                subs: Mutex::new(Vec::new()),
                any: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn delimiter(&self) -> &str {
        &self.inner.delimiter
    }

    pub fn downgrade(&self) -> WeakEventBus {
        WeakEventBus {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Parses `name` with this bus's delimiter.
    pub fn name(&self, name: &str) -> EventName {
        EventName::parse(name, &self.inner.delimiter)
    }

    /// Subscribes `handler` to `pattern`.
    pub fn on<F>(&self, pattern: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(self.pattern(pattern), Arc::new(handler), false)
    }

    /// Subscribes `handler` for the first matching event only.
    pub fn once<F>(&self, pattern: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(self.pattern(pattern), Arc::new(handler), true)
    }

    /// Subscribes with an already compiled pattern.
    pub fn on_pattern(&self, pattern: Pattern, handler: Handler) -> SubscriptionId {
        self.subscribe(pattern, handler, false)
    }

    /// Receives every event, whatever its name.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let handler: Handler = Arc::new(handler);
        lock(&self.inner.any).push((id, handler));
        id
    }

    /// Removes a registration. Returns `false` if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        {
            let mut subs = lock(&self.inner.subs);
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                subs.remove(pos);
                return true;
            }
        }
        let mut any = lock(&self.inner.any);
        match any.iter().position(|(sid, _)| *sid == id) {
            Some(pos) => {
                any.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Number of pattern subscriptions plus onAny handlers.
    pub fn listener_count(&self) -> usize {
        lock(&self.inner.subs).len() + lock(&self.inner.any).len()
    }

    /// Dispatches `event` and returns how many handlers ran.
    pub fn emit(&self, event: Event) -> usize {
        let any: Vec<Handler> = lock(&self.inner.any)
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();

        let mut matched = Vec::new();
        lock(&self.inner.subs).retain(|s| {
            if !s.pattern.matches(&event.name) {
                return true;
            }
            matched.push(Arc::clone(&s.handler));
            !s.once
        });

        for handler in any.iter().chain(matched.iter()) {
            self.invoke(handler, &event);
        }
        any.len() + matched.len()
    }

    /// Parses `name` and dispatches it with `payload`.
    pub fn emit_named(&self, name: &str, payload: Values) -> usize {
        self.emit(Event::new(self.name(name), payload))
    }

    /// Dispatches `event` with a reply path and returns the receiving end.
    ///
    /// The receiver errors when every handler dropped the event without answering.
    pub fn request(&self, event: Event) -> oneshot::Receiver<Values> {
        let (responder, rx) = Responder::channel();
        self.emit(event.with_responder(responder));
        rx
    }

    fn pattern(&self, pattern: &str) -> Pattern {
        Pattern::parse(pattern, &self.inner.delimiter)
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn subscribe(&self, pattern: Pattern, handler: Handler, once: bool) -> SubscriptionId {
        let id = self.next_id();
        lock(&self.inner.subs).push(Subscription {
            id,
            pattern,
            handler,
            once,
        });
        id
    }

    fn invoke(&self, handler: &Handler, event: &Event) {
        let Err(panic_err) = panic::catch_unwind(AssertUnwindSafe(|| handler(event))) else {
            return;
        };
        let info = panic_message(&*panic_err);
        error!(event = %event.name, %info, "event handler panicked");

        if event.name.segments() != HANDLER_ERROR {
            self.emit(Event::new(
                HANDLER_ERROR,
                vec![json!(event.name.join(&self.inner.delimiter)), json!(info)],
            ));
        }
    }
}

fn panic_message(panic_err: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic_err.downcast_ref::<&'static str>() {
        msg.to_string()
    } else if let Some(msg) = panic_err.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
