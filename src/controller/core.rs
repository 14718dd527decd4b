//! # Controller: named registry of supervised, RPC-reachable services.
//!
//! A controller owns one service-type registry (`type → executable`) and one
//! service registry (`name → ServiceHandle`). Each service is a [`Monitor`] whose
//! per-spawn [`RpcSession`](crate::RpcSession) is bridged to a mirror [`EventBus`].
//!
//! ## Architecture
//! ```text
//! start_service(opts)
//!   ├─► resolve type, pick name, register
//!   ├─► spawn lifecycle forwarder: LifecycleBus ──► on_child_event ──► bus "<name>::<kind>"
//!   ├─► monitor.start()
//!   └─► spawn session driver (one per service, lives across restarts):
//!         loop {
//!           wait for a new session ──► ready() ──► "<name>::rpcready"
//!           request "start" [service_options] ──► reply [null, …] ──► "<name>::running"
//!         }
//!       first successful handshake resolves start_service
//!
//! stop_service(name, timeout)
//!   ├─► mark stopping (a second stop fails fast)
//!   ├─► request "stop" with deadline ──► reply | Timeout
//!   ├─► monitor.stop(), driver cancelled
//!   └─► unregister ──► "<name>::stopped"
//! ```
//!
//! ## Rules
//! - The start handshake has no deadline; the stop handshake always has one.
//! - A stop removes the entry whatever the handshake outcome.
//! - Registry locks are never held across an await.
//! - Replies on the management surface are error-first: `[null, …]` or `[error]`.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use futures::future::join_all;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{oneshot, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::{ControllerConfig, ServiceOptions};
use super::service::{ServiceEntry, ServiceHandle};
use crate::bus::{Event, EventBus, EventName, Values};
use crate::error::{ControllerError, RpcError};
use crate::lifecycle::{LifecycleEvent, LifecycleKind, LifecycleReceiver};
use crate::monitor::{IpcOptions, Monitor, MonitorOptions, MonitorState, ProcessSpec};
use crate::rpc::{RpcSession, bridge};

/// Handshake sent to a freshly connected child, with its `service_options`.
pub const START_EVENT: &str = "start";
/// Handshake asking a child to wind down before it is signalled.
pub const STOP_EVENT: &str = "stop";
/// Leading segment of management commands.
pub const MANAGEMENT_PREFIX: &str = "service";

/// Result slot of one service in a controller-wide [`Controller::stop`].
#[derive(Debug)]
pub struct StopOutcome {
    pub name: String,
    /// `None` on success.
    pub error: Option<ControllerError>,
}

impl StopOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Named registry of services sharing one configuration.
pub struct Controller {
    types: RwLock<BTreeMap<String, PathBuf>>,
    cfg: ControllerConfig,
    bus: EventBus,
    services: RwLock<HashMap<String, ServiceHandle>>,
    next_name: AtomicU64,
    me: Weak<Controller>,
}

impl Controller {
    /// Creates a controller; the configured service types are registered right away.
    pub fn new(cfg: ControllerConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            types: RwLock::new(cfg.services.clone()),
            cfg,
            bus: EventBus::new(),
            services: RwLock::new(HashMap::new()),
            next_name: AtomicU64::new(1),
            me: me.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.cfg
    }

    /// Upward events: lifecycle and child messages, prefixed with the service name.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    // ---- service types ----

    pub fn service_add(
        &self,
        service_type: impl Into<String>,
        command: impl Into<PathBuf>,
    ) -> Result<(), ControllerError> {
        let service_type = service_type.into();
        let mut types = write(&self.types);
        if types.contains_key(&service_type) {
            return Err(ControllerError::DuplicateType(service_type));
        }
        types.insert(service_type, command.into());
        Ok(())
    }

    pub fn service_remove(&self, service_type: &str) -> Result<PathBuf, ControllerError> {
        write(&self.types)
            .remove(service_type)
            .ok_or_else(|| ControllerError::UnknownType(service_type.to_string()))
    }

    /// Executable registered for `service_type`.
    pub fn service_get(&self, service_type: &str) -> Result<PathBuf, ControllerError> {
        read(&self.types)
            .get(service_type)
            .cloned()
            .ok_or_else(|| ControllerError::UnknownType(service_type.to_string()))
    }

    /// Registered types, sorted by name.
    pub fn service_list(&self) -> Vec<(String, PathBuf)> {
        read(&self.types)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    // ---- services ----

    /// Spawns a service and waits for its start handshake.
    ///
    /// There is no deadline: a child that never answers keeps this call pending.
    /// Fails when the process reaches a terminal state before answering, or when the
    /// child answers with an error; the entry is removed in both cases.
    pub async fn start_service(
        &self,
        opts: ServiceOptions,
    ) -> Result<ServiceHandle, ControllerError> {
        let command = self.service_get(&opts.service_type)?;
        let handle = self.register(command, opts)?;
        let name = handle.name().to_string();

        tokio::spawn(forward_lifecycle(
            self.me.clone(),
            name.clone(),
            Arc::downgrade(&handle.entry),
            handle.monitor().subscribe(),
        ));
        if let Err(e) = handle.monitor().start() {
            warn!(controller = %self.cfg.name, service = %name, error = %e, "service failed to spawn");
            handle.entry.stopping.store(true, Ordering::SeqCst);
            self.unregister(&handle);
            return Err(e.into());
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(drive_sessions(self.me.clone(), handle.clone(), ready_tx));

        let ready = ready_rx
            .await
            .unwrap_or_else(|_| Err(ControllerError::Exited(name.clone())));
        match ready {
            Ok(()) => {
                info!(controller = %self.cfg.name, service = %name, pid = ?handle.pid(), "service started");
                Ok(handle)
            }
            Err(e) => {
                warn!(controller = %self.cfg.name, service = %name, error = %e, "service failed to start");
                handle.entry.stopping.store(true, Ordering::SeqCst);
                handle.entry.driver.cancel();
                if handle.monitor().is_running() {
                    let _ = handle.monitor().stop();
                }
                self.unregister(&handle);
                Err(e)
            }
        }
    }

    /// Stop handshake with a deadline (`None`: the configured `stop_timeout`), then stop.
    ///
    /// The entry is removed even when the handshake fails or times out.
    pub async fn stop_service(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> Result<(), ControllerError> {
        let handle = self.get_service(name)?;
        if handle.entry.stopping.swap(true, Ordering::SeqCst) {
            return Err(ControllerError::NotRunning(name.to_string()));
        }
        let timeout = timeout.unwrap_or(self.cfg.stop_timeout);

        let outcome = self.stop_handshake(&handle, timeout).await;
        handle.entry.driver.cancel();
        if handle.monitor().is_running() {
            let _ = handle.monitor().stop();
        }
        self.unregister(&handle);

        let status = match &outcome {
            Ok(()) => {
                info!(controller = %self.cfg.name, service = name, "service stopped");
                Value::Null
            }
            Err(e) => {
                warn!(controller = %self.cfg.name, service = name, error = %e, "service stopped uncleanly");
                json!(e.to_string())
            }
        };
        self.emit_service(name, "stopped", vec![status]);
        outcome
    }

    /// Stops every service concurrently; one outcome per service.
    ///
    /// Returns once every handshake finished and the processes terminated, or the
    /// kill timeout plus one second elapsed.
    pub async fn stop(&self) -> Vec<StopOutcome> {
        let handles = self.services();
        if handles.is_empty() {
            return Vec::new();
        }
        info!(controller = %self.cfg.name, services = handles.len(), "stopping all services");

        let outcomes = join_all(handles.iter().map(|h| async move {
            StopOutcome {
                name: h.name().to_string(),
                error: self.stop_service(h.name(), None).await.err(),
            }
        }))
        .await;

        let grace = self.cfg.kill_timeout + Duration::from_secs(1);
        let exits = join_all(handles.iter().map(|h| h.monitor().wait_terminal()));
        if time::timeout(grace, exits).await.is_err() {
            warn!(controller = %self.cfg.name, ?grace, "processes still alive after stop");
        }
        outcomes
    }

    /// Starts the configured autostart services, in order, stopping at the first failure.
    pub async fn start_autostart(&self) -> Result<Vec<ServiceHandle>, ControllerError> {
        let mut started = Vec::with_capacity(self.cfg.autostart.len());
        for opts in &self.cfg.autostart {
            started.push(self.start_service(opts.clone()).await?);
        }
        Ok(started)
    }

    pub fn get_service(&self, name: &str) -> Result<ServiceHandle, ControllerError> {
        read(&self.services)
            .get(name)
            .cloned()
            .ok_or_else(|| ControllerError::UnknownName(name.to_string()))
    }

    /// Registered services, sorted by name.
    pub fn services(&self) -> Vec<ServiceHandle> {
        let mut all: Vec<ServiceHandle> = read(&self.services).values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services()
            .iter()
            .map(|h| h.name().to_string())
            .collect()
    }

    // ---- events ----

    /// Downward dispatch of an event addressed to this controller (prefix already stripped).
    ///
    /// - `service::<command>`: management, see [`MANAGEMENT_PREFIX`]
    /// - `<name>::<rest>`: forwarded to that child (request if the event wants a reply)
    ///
    /// Must be called inside a tokio runtime.
    pub fn handle_event(&self, event: &Event) {
        let Some((head, rest)) = event.name.split_first() else {
            return;
        };
        if head == MANAGEMENT_PREFIX {
            return self.manage(&rest, event);
        }

        let handle = match self.get_service(head) {
            Ok(handle) => handle,
            Err(e) => {
                debug!(controller = %self.cfg.name, event = %event.name, "no such service");
                answer(event, bridge::err_reply(e));
                return;
            }
        };
        if rest.is_empty() {
            answer(event, bridge::err_reply("missing event name"));
            return;
        }

        let forwarded = event.clone().renamed(rest);
        if forwarded.wants_reply() {
            tokio::spawn(async move {
                let reply = match handle.request(&forwarded).await {
                    Ok(values) => values,
                    Err(e) => bridge::err_reply(e),
                };
                answer(&forwarded, reply);
            });
        } else if let Err(e) = handle.emit(&forwarded) {
            warn!(service = handle.name(), event = %forwarded.name, error = %e, "event not forwarded");
        }
    }

    /// Logs a lifecycle event and re-emits it as `<service>::<kind>`.
    pub fn on_child_event(&self, service: &str, ev: &LifecycleEvent) {
        match ev.kind {
            LifecycleKind::Stdout | LifecycleKind::Stderr => {
                let text = ev.text().unwrap_or_default();
                debug!(service, stream = ev.kind.as_label(), output = %text.trim_end(), "service output");
            }
            LifecycleKind::Error => {
                warn!(service, reason = ?ev.reason, "service error");
            }
            LifecycleKind::Warn => {
                debug!(service, reason = ?ev.reason, exit_code = ?ev.exit_code, "service warning");
            }
            _ => {
                info!(service, event = ev.kind.as_label(), pid = ?ev.pid, "service lifecycle");
            }
        }
        self.emit_service(service, ev.kind.as_label(), vec![ev.to_json()]);
    }

    /// Re-emits an event the child sent upwards as `<service>::<event>`, reply path included.
    pub fn on_child_message(&self, service: &str, event: &Event) {
        let name = event.name.prefixed(service);
        self.bus.emit(event.clone().renamed(name));
    }

    fn emit_service(&self, service: &str, kind: &str, payload: Values) {
        self.bus.emit(Event::new(EventName::new([service, kind]), payload));
    }

    fn manage(&self, command: &EventName, event: &Event) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let event = event.clone();
        match command.first() {
            Some("start") => {
                let opts = serde_json::from_value::<ServiceOptions>(event.arg(0).clone());
                tokio::spawn(async move {
                    let reply = match opts {
                        Err(e) => bridge::err_reply(format!("invalid service options: {e}")),
                        Ok(opts) => match me.start_service(opts).await {
                            Ok(handle) => bridge::ok_reply(vec![json!(handle.name())]),
                            Err(e) => bridge::err_reply(e),
                        },
                    };
                    answer(&event, reply);
                });
            }
            Some("stop") => {
                let name = event.arg(0).as_str().map(str::to_owned);
                let timeout = event.arg(1).as_u64().map(Duration::from_millis);
                tokio::spawn(async move {
                    let reply = match name {
                        None => bridge::err_reply("missing service name"),
                        Some(name) => match me.stop_service(&name, timeout).await {
                            Ok(()) => bridge::ok_reply(Vec::new()),
                            Err(e) => bridge::err_reply(e),
                        },
                    };
                    answer(&event, reply);
                });
            }
            Some("get") => {
                let reply = match event.arg(0).as_str().map(|name| self.get_service(name)) {
                    None => bridge::err_reply("missing service name"),
                    Some(Ok(handle)) => bridge::ok_reply(vec![handle.summary()]),
                    Some(Err(e)) => bridge::err_reply(e),
                };
                answer(&event, reply);
            }
            Some("list") => {
                let list = self.services().iter().map(ServiceHandle::summary).collect();
                answer(&event, bridge::ok_reply(vec![Value::Array(list)]));
            }
            Some("types") => {
                let types: serde_json::Map<String, Value> = self
                    .service_list()
                    .into_iter()
                    .map(|(k, v)| (k, json!(v)))
                    .collect();
                answer(&event, bridge::ok_reply(vec![Value::Object(types)]));
            }
            _ => {
                answer(&event, bridge::err_reply(format!("unknown management command `{command}`")));
            }
        }
    }

    // ---- internals ----

    fn register(
        &self,
        command: PathBuf,
        opts: ServiceOptions,
    ) -> Result<ServiceHandle, ControllerError> {
        let mut services = write(&self.services);
        let name = match &opts.name {
            Some(name) if services.contains_key(name) => {
                return Err(ControllerError::DuplicateName(name.clone()));
            }
            Some(name) => name.clone(),
            None => loop {
                let n = self.next_name.fetch_add(1, Ordering::Relaxed);
                let candidate = format!("{}Service{n}", opts.service_type);
                if !services.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        let bus = EventBus::new();
        let me = self.me.clone();
        let service = name.clone();
        bus.on_any(move |ev| {
            if let Some(ctrl) = me.upgrade() {
                ctrl.on_child_message(&service, ev);
            }
        });

        let spec = ProcessSpec {
            command,
            args: opts.args.clone(),
            cwd: opts.cwd.clone(),
            env: opts.env.clone(),
            uid: opts.uid,
            gid: opts.gid,
            ..ProcessSpec::default()
        };
        let monitor = Monitor::new(
            name.as_str(),
            spec,
            MonitorOptions {
                policy: opts.restart.unwrap_or(self.cfg.restart),
                kill_timeout: self.cfg.kill_timeout,
                bus_capacity: self.cfg.bus_capacity,
                ipc: Some(IpcOptions {
                    dir: self.cfg.ipc_dir.clone(),
                    api: bridge::event_api(bus.clone()),
                }),
            },
        );

        let handle = ServiceHandle {
            entry: Arc::new(ServiceEntry {
                name: name.clone(),
                options: opts,
                monitor,
                bus,
                stopping: AtomicBool::new(false),
                driver: CancellationToken::new(),
            }),
        };
        services.insert(name, handle.clone());
        Ok(handle)
    }

    /// Removes `handle` unless its name was already reused by another service.
    fn unregister(&self, handle: &ServiceHandle) {
        let mut services = write(&self.services);
        if services.get(handle.name()).is_some_and(|h| h.same(handle)) {
            services.remove(handle.name());
        }
    }

    async fn stop_handshake(
        &self,
        handle: &ServiceHandle,
        timeout: Duration,
    ) -> Result<(), ControllerError> {
        let Some(remote) = handle.remote() else {
            debug!(service = handle.name(), "not connected, skipping stop handshake");
            return Ok(());
        };
        let event = Event::new(STOP_EVENT, Vec::new());
        match time::timeout(timeout, bridge::request(&remote, &event)).await {
            Err(_) => Err(ControllerError::Timeout {
                name: handle.name().to_string(),
                timeout,
            }),
            // the child went away on its own
            Ok(Err(RpcError::SessionClosed)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(values)) => bridge::split_reply(values).map(drop).map_err(|reason| {
                ControllerError::ServiceFailed {
                    name: handle.name().to_string(),
                    phase: "stop",
                    reason,
                }
            }),
        }
    }
}

/// Runs one start handshake per new session of `handle`, across restarts.
async fn drive_sessions(
    ctrl: Weak<Controller>,
    handle: ServiceHandle,
    ready: oneshot::Sender<Result<(), ControllerError>>,
) {
    let name = handle.name().to_string();
    let driver = handle.entry.driver.clone();
    let mut ready = Some(ready);
    let mut sessions = handle.monitor().watch_sessions();
    let mut state = handle.monitor().watch_state();
    let mut last: Option<u64> = None;

    loop {
        let current = sessions.borrow_and_update().clone();
        let session = match current {
            Some(session) if Some(session.id()) != last => session,
            _ => {
                tokio::select! {
                    _ = driver.cancelled() => break,
                    changed = sessions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    _ = terminal(&mut state) => {
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(Err(ControllerError::Exited(name.clone())));
                        }
                        break;
                    }
                }
            }
        };
        last = Some(session.id());

        match handshake(&ctrl, &handle, &session, &driver).await {
            Ok(results) => {
                debug!(service = %name, session = session.id(), "start handshake completed");
                if let Some(ctrl) = ctrl.upgrade() {
                    ctrl.emit_service(&name, "running", results);
                }
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Err(ControllerError::Rpc(RpcError::SessionClosed)) => {
                debug!(service = %name, "session closed before the start handshake completed");
            }
            Err(e) => {
                warn!(service = %name, error = %e, "start handshake failed");
                match ready.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                    None => {
                        if let Some(ctrl) = ctrl.upgrade() {
                            ctrl.emit_service(&name, "error", vec![json!(e.to_string())]);
                        }
                    }
                }
            }
        }
    }
}

async fn handshake(
    ctrl: &Weak<Controller>,
    handle: &ServiceHandle,
    session: &RpcSession,
    driver: &CancellationToken,
) -> Result<Values, ControllerError> {
    let remote = tokio::select! {
        remote = session.ready() => remote?,
        _ = driver.cancelled() => return Err(RpcError::SessionClosed.into()),
    };
    if let Some(ctrl) = ctrl.upgrade() {
        ctrl.emit_service(handle.name(), "rpcready", vec![json!(remote.functions())]);
    }

    let event = Event::new(START_EVENT, vec![handle.options().service_options.clone()]);
    let values = bridge::request(&remote, &event).await?;
    bridge::split_reply(values).map_err(|reason| ControllerError::ServiceFailed {
        name: handle.name().to_string(),
        phase: "start",
        reason,
    })
}

async fn terminal(state: &mut watch::Receiver<MonitorState>) {
    let _ = state.wait_for(MonitorState::is_terminal).await;
}

/// Feeds lifecycle events of one service into [`Controller::on_child_event`].
async fn forward_lifecycle(
    ctrl: Weak<Controller>,
    name: String,
    entry: Weak<ServiceEntry>,
    mut rx: LifecycleReceiver,
) {
    loop {
        match rx.recv().await {
            Ok(ev) => {
                let Some(ctrl) = ctrl.upgrade() else {
                    break;
                };
                ctrl.on_child_event(&name, &ev);
                let done = entry
                    .upgrade()
                    .is_none_or(|e| e.stopping.load(Ordering::SeqCst));
                if ev.is_terminal() && done {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(service = %name, skipped, "lifecycle forwarder lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Delivers `reply` to the emitter, or logs it when nobody waits for it.
fn answer(event: &Event, reply: Values) {
    if event.wants_reply() {
        event.respond(reply);
        return;
    }
    if let Err(e) = bridge::split_reply(reply) {
        warn!(event = %event.name, error = %e, "command failed");
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
    use std::sync::Mutex;

    fn controller() -> Arc<Controller> {
        Controller::new(ControllerConfig::named("test"))
    }

    #[test]
    fn type_registry() {
        let ctrl = controller();
        ctrl.service_add("proxy", "/usr/bin/proxy").unwrap();
        ctrl.service_add("drone", "/usr/bin/drone").unwrap();

        assert!(matches!(
            ctrl.service_add("proxy", "/elsewhere"),
            Err(ControllerError::DuplicateType(t)) if t == "proxy"
        ));
        assert_eq!(ctrl.service_get("drone").unwrap(), PathBuf::from("/usr/bin/drone"));
        let names: Vec<String> = ctrl.service_list().into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, ["drone", "proxy"]);

        ctrl.service_remove("drone").unwrap();
        assert!(matches!(ctrl.service_remove("drone"), Err(ControllerError::UnknownType(_))));
        assert!(matches!(ctrl.service_get("drone"), Err(ControllerError::UnknownType(_))));
    }

    #[test]
    fn configured_types_are_preloaded() {
        let mut cfg = ControllerConfig::named("x");
        cfg.services.insert("echo".into(), "/bin/echo".into());
        assert!(Controller::new(cfg).service_get("echo").is_ok());
    }

    #[test]
    fn generated_names_skip_taken_ones() {
        let ctrl = controller();
        let a = ctrl.register("/bin/true".into(), ServiceOptions::new("echo")).unwrap();
        assert_eq!(a.name(), "echoService1");

        ctrl.register("/bin/true".into(), ServiceOptions::new("echo").name("echoService2"))
            .unwrap();
        let c = ctrl.register("/bin/true".into(), ServiceOptions::new("echo")).unwrap();
        assert_eq!(c.name(), "echoService3");

        assert!(matches!(
            ctrl.register("/bin/true".into(), ServiceOptions::new("echo").name("echoService1")),
            Err(ControllerError::DuplicateName(_))
        ));
        assert_eq!(ctrl.service_names(), ["echoService1", "echoService2", "echoService3"]);

        ctrl.unregister(&a);
        assert!(matches!(ctrl.get_service("echoService1"), Err(ControllerError::UnknownName(_))));
    }

    #[tokio::test]
    async fn unknown_type_fails_before_anything_runs() {
        let ctrl = controller();
        let err = ctrl.start_service(ServiceOptions::new("nope")).await.unwrap_err();
        assert_eq!(err.to_string(), "cannot return service for unknown type `nope`");
        assert!(ctrl.services().is_empty());
    }

    #[tokio::test]
    async fn spawn_failure_cleans_up() {
        let ctrl = controller();
        ctrl.service_add("ghost", "/nonexistent/ghost").unwrap();
        let err = ctrl.start_service(ServiceOptions::new("ghost")).await.unwrap_err();
        assert_eq!(err.as_label(), "spawn_not_found");
        assert!(ctrl.services().is_empty());
    }

    #[tokio::test]
    async fn stop_without_services_is_empty() {
        assert!(controller().stop().await.is_empty());
    }

    #[tokio::test]
    async fn stop_unknown_name_fails() {
        let err = controller().stop_service("alice", None).await.unwrap_err();
        assert!(matches!(err, ControllerError::UnknownName(n) if n == "alice"));
    }

    #[tokio::test]
    async fn management_queries_reply_error_first() {
        let ctrl = controller();
        ctrl.service_add("drone", "/usr/bin/drone").unwrap();

        let (responder, rx) = crate::bus::Responder::channel();
        ctrl.handle_event(&Event::new("service::types", vec![]).with_responder(responder));
        let reply = bridge::split_reply(rx.await.unwrap()).unwrap();
        assert_eq!(reply, vec![json!({"drone": "/usr/bin/drone"})]);

        let (responder, rx) = crate::bus::Responder::channel();
        ctrl.handle_event(&Event::new("service::get", vec![json!("bob")]).with_responder(responder));
        assert_eq!(
            bridge::split_reply(rx.await.unwrap()),
            Err("service `bob` does not exist".to_string())
        );

        let (responder, rx) = crate::bus::Responder::channel();
        ctrl.handle_event(&Event::new("service::list", vec![]).with_responder(responder));
        assert_eq!(bridge::split_reply(rx.await.unwrap()), Ok(vec![json!([])]));

        let (responder, rx) = crate::bus::Responder::channel();
        ctrl.handle_event(&Event::new("service::bogus", vec![]).with_responder(responder));
        assert!(bridge::split_reply(rx.await.unwrap()).is_err());
    }

    #[tokio::test]
    async fn events_for_unknown_services_are_answered() {
        let ctrl = controller();
        let (responder, rx) = crate::bus::Responder::channel();
        ctrl.handle_event(&Event::new("alice::app::start", vec![]).with_responder(responder));
        assert_eq!(
            bridge::split_reply(rx.await.unwrap()),
            Err("service `alice` does not exist".to_string())
        );
    }

    #[test]
    fn child_traffic_is_prefixed_on_the_controller_bus() {
        let ctrl = controller();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        ctrl.bus().on("alice::**", move |ev| {
            s.lock().unwrap().push(ev.name.to_string());
        });

        ctrl.on_child_message("alice", &Event::new("app::started", vec![]));
        ctrl.on_child_event("alice", &LifecycleEvent::new(LifecycleKind::Restart, "alice"));

        assert_eq!(*seen.lock().unwrap(), ["alice::app::started", "alice::restart"]);
    }
}
