//! # Root router.
//!
//! [`SystemRouter`] owns the root [`EventBus`] and a table of [`Subsystem`]s.
//!
//! ## Architecture
//! ```text
//! root bus emit "<sub>::<rest…>"
//!   └─► on_any ─► route()
//!         ├─ "log::…"           → logged only
//!         ├─ "<sub>::<rest…>"   → subsystem.handle_event("<rest…>")
//!         └─ anything else      → logged only
//!
//! subsystem bus emit "<x…>"
//!   └─► on_any ─► root bus emit "log::<sub>::<x…>"
//! ```
//!
//! ## Rules
//! - Attach order is start order; stop runs in reverse order, one subsystem at a time.
//! - A failed start aborts the remaining starts.
//! - Stop outcomes are named `<sub>::<service>`.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, trace, warn};

use super::subsystem::SubsystemRef;
use crate::bus::{Event, EventBus, Values};
use crate::controller::StopOutcome;
use crate::error::SystemError;

/// Leading segment of subsystem traffic mirrored on the root bus.
pub const LOG_PREFIX: &str = "log";

type Table = Arc<RwLock<Vec<SubsystemRef>>>;

/// Root bus routing prefixed events to subsystems.
pub struct SystemRouter {
    bus: EventBus,
    subsystems: Table,
}

impl Default for SystemRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemRouter {
    pub fn new() -> Self {
        let bus = EventBus::new();
        let subsystems: Table = Arc::default();
        let table = Arc::clone(&subsystems);
        bus.on_any(move |ev| route(&table, ev));
        Self { bus, subsystems }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Adds `subsystem` after the ones already attached.
    pub fn attach(&self, subsystem: SubsystemRef) -> Result<(), SystemError> {
        let mut table = write(&self.subsystems);
        let name = subsystem.name().to_string();
        if table.iter().any(|s| s.name() == name) {
            return Err(SystemError::DuplicateSubsystem(name));
        }

        let root = self.bus.downgrade();
        let prefix = name.clone();
        subsystem.bus().on_any(move |ev| {
            if let Some(root) = root.upgrade() {
                let name = ev.name.prefixed(prefix.as_str()).prefixed(LOG_PREFIX);
                root.emit(ev.clone().renamed(name));
            }
        });

        debug!(subsystem = %name, "subsystem attached");
        table.push(subsystem);
        Ok(())
    }

    pub fn subsystem(&self, name: &str) -> Option<SubsystemRef> {
        read(&self.subsystems)
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    /// Attached names, in start order.
    pub fn names(&self) -> Vec<String> {
        read(&self.subsystems)
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Emits on the root bus; returns how many handlers ran.
    pub fn emit(&self, event: Event) -> usize {
        self.bus.emit(event)
    }

    /// Emits on the root bus and waits for the first reply.
    ///
    /// Errors when the event reached no one able to answer.
    pub async fn request(&self, event: Event) -> Result<Values, SystemError> {
        let name = event.name.to_string();
        self.bus
            .request(event)
            .await
            .map_err(|_| SystemError::Unanswered(name))
    }

    /// Starts every subsystem in attach order, stopping at the first failure.
    pub async fn start(&self) -> Result<(), SystemError> {
        for sub in self.snapshot() {
            info!(subsystem = sub.name(), "starting subsystem");
            sub.start().await.map_err(|source| SystemError::StartFailed {
                name: sub.name().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Stops every subsystem in reverse attach order; each stop completes before the next begins.
    pub async fn stop(&self) -> Vec<StopOutcome> {
        let mut outcomes = Vec::new();
        for sub in self.snapshot().iter().rev() {
            info!(subsystem = sub.name(), "stopping subsystem");
            for mut outcome in sub.stop().await {
                if let Some(e) = &outcome.error {
                    warn!(subsystem = sub.name(), service = %outcome.name, error = %e, "service failed to stop");
                }
                outcome.name = format!("{}::{}", sub.name(), outcome.name);
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    fn snapshot(&self) -> Vec<SubsystemRef> {
        read(&self.subsystems).clone()
    }
}

fn route(table: &Table, event: &Event) {
    let Some((head, rest)) = event.name.split_first() else {
        return;
    };
    if head == LOG_PREFIX {
        trace!(event = %rest, payload = ?event.payload, "subsystem event");
        return;
    }

    let target = read(table).iter().find(|s| s.name() == head).cloned();
    match target {
        Some(_) if rest.is_empty() => {
            debug!(event = %event.name, "event without a command");
        }
        Some(sub) => sub.handle_event(&event.clone().renamed(rest)),
        None => {
            debug!(event = %event.name, "unrouted event");
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ControllerError;
    use crate::system::Subsystem;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Probe {
        name: &'static str,
        bus: EventBus,
        journal: Journal,
        fail_start: bool,
    }

    impl Probe {
        fn new(name: &'static str, journal: &Journal) -> Arc<Self> {
            Self::build(name, journal, false)
        }

        fn failing(name: &'static str, journal: &Journal) -> Arc<Self> {
            Self::build(name, journal, true)
        }

        fn build(name: &'static str, journal: &Journal, fail_start: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                bus: EventBus::new(),
                journal: Arc::clone(journal),
                fail_start,
            })
        }

        fn note(&self, entry: String) {
            self.journal.lock().unwrap().push(entry);
        }
    }

    #[async_trait]
    impl Subsystem for Probe {
        fn name(&self) -> &str {
            self.name
        }

        fn bus(&self) -> &EventBus {
            &self.bus
        }

        fn handle_event(&self, event: &Event) {
            self.note(format!("{}<-{}", self.name, event.name));
            event.respond(vec![json!(null), json!(self.name)]);
        }

        async fn start(&self) -> Result<(), ControllerError> {
            self.note(format!("start {}", self.name));
            if self.fail_start {
                return Err(ControllerError::UnknownType("boom".into()));
            }
            Ok(())
        }

        async fn stop(&self) -> Vec<StopOutcome> {
            self.note(format!("stop {}", self.name));
            vec![StopOutcome {
                name: "svc".into(),
                error: None,
            }]
        }
    }

    fn journal() -> Journal {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn routes_by_leading_segment() {
        let j = journal();
        let router = SystemRouter::new();
        router.attach(Probe::new("serviceEnv", &j)).unwrap();
        router.attach(Probe::new("resourceEnv", &j)).unwrap();

        router.emit(Event::new("resourceEnv::alice::app::start", vec![]));
        router.emit(Event::new("nobody::home", vec![]));
        router.emit(Event::new("serviceEnv", vec![]));
        let reply = router
            .request(Event::new("serviceEnv::service::list", vec![]))
            .await
            .unwrap();

        assert_eq!(reply, vec![json!(null), json!("serviceEnv")]);
        assert_eq!(
            *j.lock().unwrap(),
            ["resourceEnv<-alice::app::start", "serviceEnv<-service::list"]
        );
    }

    #[tokio::test]
    async fn unrouted_requests_fail() {
        let router = SystemRouter::new();
        let err = router.request(Event::new("ghost::x", vec![])).await.unwrap_err();
        assert_eq!(err.as_label(), "system_unanswered");
    }

    #[test]
    fn duplicate_subsystems_are_rejected() {
        let j = journal();
        let router = SystemRouter::new();
        router.attach(Probe::new("apiEnv", &j)).unwrap();
        assert!(matches!(
            router.attach(Probe::new("apiEnv", &j)),
            Err(SystemError::DuplicateSubsystem(n)) if n == "apiEnv"
        ));
        assert_eq!(router.names(), ["apiEnv"]);
        assert!(router.subsystem("apiEnv").is_some());
        assert!(router.subsystem("other").is_none());
    }

    #[test]
    fn subsystem_traffic_is_mirrored_under_log() {
        let j = journal();
        let router = SystemRouter::new();
        let probe = Probe::new("resourceEnv", &j);
        router.attach(probe.clone()).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        router.bus().on("log::*::*::exit", move |ev| {
            s.lock().unwrap().push(ev.name.to_string());
        });

        probe.bus().emit(Event::new("alice::exit", vec![json!({"spinning": true})]));
        assert_eq!(*seen.lock().unwrap(), ["log::resourceEnv::alice::exit"]);
        // mirrored traffic never loops back into the subsystem
        assert!(j.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn starts_in_order_and_stops_in_reverse() {
        let j = journal();
        let router = SystemRouter::new();
        router.attach(Probe::new("serviceEnv", &j)).unwrap();
        router.attach(Probe::new("resourceEnv", &j)).unwrap();

        router.start().await.unwrap();
        let outcomes = router.stop().await;

        let names: Vec<&str> = outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, ["resourceEnv::svc", "serviceEnv::svc"]);
        assert!(outcomes.iter().all(StopOutcome::is_ok));
        assert_eq!(
            *j.lock().unwrap(),
            ["start serviceEnv", "start resourceEnv", "stop resourceEnv", "stop serviceEnv"]
        );
    }

    #[tokio::test]
    async fn failed_start_skips_the_rest() {
        let j = journal();
        let router = SystemRouter::new();
        router.attach(Probe::failing("serviceEnv", &j)).unwrap();
        router.attach(Probe::new("resourceEnv", &j)).unwrap();

        let err = router.start().await.unwrap_err();
        assert!(matches!(&err, SystemError::StartFailed { name, .. } if name == "serviceEnv"));
        assert_eq!(*j.lock().unwrap(), ["start serviceEnv"]);
    }
}
