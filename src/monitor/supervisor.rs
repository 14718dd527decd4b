//! # Monitor: handle to one supervised OS process.
//!
//! The handle owns the shared state; the per-process work (waiting, signalling,
//! relaunching) happens in the actor spawned by [`Monitor::start`].
//!
//! ```text
//!        start()                 exit → RestartPolicy::decide
//! Idle ──────────► Running ──┬── RestartNow / RestartAfter(d) ──► Running (restart)
//!                            ├── Exited { spinning }          ──► Exited
//!                            └── Stopped (stop() was called)  ──► Stopped
//! ```
//!
//! ## Rules
//! - The OS handle never leaves the actor; `stop`/`restart` only send it a request.
//! - `start()` fails synchronously and leaves the state untouched when spawning fails.
//! - Every spawn gets a fresh IPC listener and at most one [`RpcSession`]; the session is
//!   closed before the child handle is released.
//! - Lifecycle events go out on the monitor's [`LifecycleBus`]; publishing never blocks.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::actor::{self, Control};
use super::policy::RestartPolicy;
use super::spec::{ProcessInfo, ProcessSpec};
use crate::error::MonitorError;
use crate::lifecycle::{LifecycleBus, LifecycleEvent, LifecycleKind, LifecycleReceiver};
use crate::rpc::{LocalApi, RpcSession};

/// Observable state of a [`Monitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Never started, or the last `start()` failed.
    Idle,
    /// A process is alive, or a restart is pending.
    Running,
    /// The policy gave up.
    Exited,
    /// `stop()` was honoured.
    Stopped,
}

impl MonitorState {
    pub fn as_label(&self) -> &'static str {
        match self {
            MonitorState::Idle => "idle",
            MonitorState::Running => "running",
            MonitorState::Exited => "exited",
            MonitorState::Stopped => "stopped",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, MonitorState::Exited | MonitorState::Stopped)
    }
}

/// Where to bind the per-spawn socket and what to declare on it.
#[derive(Clone, Debug)]
pub struct IpcOptions {
    pub dir: PathBuf,
    pub api: LocalApi,
}

/// Supervision parameters.
#[derive(Clone, Debug)]
pub struct MonitorOptions {
    pub policy: RestartPolicy,
    /// Grace period between `SIGTERM` and `SIGKILL`.
    pub kill_timeout: Duration,
    /// Capacity of each lifecycle broadcast lane.
    pub bus_capacity: usize,
    /// `None`: no IPC, the child only gets stdout/stderr.
    pub ipc: Option<IpcOptions>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            policy: RestartPolicy::default(),
            kill_timeout: Duration::from_secs(5),
            bus_capacity: 1024,
            ipc: None,
        }
    }
}

#[derive(Default)]
pub(super) struct Shared {
    pub info: Option<ProcessInfo>,
    pub restart_count: u32,
    pub force_stop: bool,
    pub force_restart: bool,
    pub control: Option<mpsc::UnboundedSender<Control>>,
}

pub(super) struct Inner {
    pub id: Arc<str>,
    pub spec: ProcessSpec,
    pub opts: MonitorOptions,
    pub bus: LifecycleBus,
    pub state: watch::Sender<MonitorState>,
    pub session: watch::Sender<Option<RpcSession>>,
    shared: Mutex<Shared>,
}

impl Inner {
    pub(super) fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn publish(&self, ev: LifecycleEvent) {
        self.bus.publish(ev);
    }

    pub(super) fn event(&self, kind: LifecycleKind) -> LifecycleEvent {
        LifecycleEvent::new(kind, Arc::clone(&self.id))
    }

    /// Ends one process generation: no session may outlive it.
    pub(super) fn end_generation(&self, cancel: &CancellationToken) {
        let _shared = self.lock();
        cancel.cancel();
        if let Some(session) = self.session.send_replace(None) {
            session.close();
        }
    }

    /// Installs `session` unless its generation already ended.
    pub(super) fn install_session(&self, session: RpcSession, cancel: &CancellationToken) {
        let _shared = self.lock();
        if cancel.is_cancelled() {
            session.close();
            return;
        }
        self.session.send_replace(Some(session));
    }

    /// Terminal transition: state first, then the `exit` event.
    pub(super) fn finish(&self, state: MonitorState, spinning: bool) {
        let (pid, restart_count) = {
            let mut shared = self.lock();
            shared.control = None;
            shared.force_stop = false;
            shared.force_restart = false;
            (shared.info.as_ref().map(|i| i.pid), shared.restart_count)
        };
        self.state.send_replace(state);

        info!(monitor = %self.id, state = state.as_label(), spinning, restart_count, "process supervision ended");
        let mut ev = self
            .event(LifecycleKind::Exit)
            .with_spinning(spinning)
            .with_restart_count(restart_count)
            .with_reason(state.as_label());
        if let Some(pid) = pid {
            ev = ev.with_pid(pid);
        }
        self.publish(ev);
    }
}

/// Supervisor of one OS process. Cheap to clone.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

impl Monitor {
    /// Creates an idle monitor; nothing runs until [`start`](Self::start).
    pub fn new(id: impl Into<Arc<str>>, spec: ProcessSpec, opts: MonitorOptions) -> Self {
        let bus = LifecycleBus::new(opts.bus_capacity);
        let (state, _) = watch::channel(MonitorState::Idle);
        let (session, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                spec,
                opts,
                bus,
                state,
                session,
                shared: Mutex::new(Shared::default()),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.inner.spec
    }

    pub fn options(&self) -> &MonitorOptions {
        &self.inner.opts
    }

    /// Spawns the process and starts supervising it.
    ///
    /// Must be called inside a tokio runtime. Spawn failures are returned here and
    /// reported once as an `error` event; they are never retried.
    pub fn start(&self) -> Result<ProcessInfo, MonitorError> {
        let inner = &self.inner;
        let (tx, rx) = mpsc::unbounded_channel();

        let generation = {
            let mut shared = inner.lock();
            if *inner.state.borrow() == MonitorState::Running {
                return Err(MonitorError::AlreadyRunning {
                    id: inner.id.to_string(),
                });
            }
            let generation = match actor::launch(inner, &mut shared) {
                Ok(generation) => generation,
                Err(e) => {
                    drop(shared);
                    inner.publish(inner.event(LifecycleKind::Error).with_reason(e.to_string()));
                    return Err(e.into());
                }
            };
            shared.restart_count = 0;
            shared.force_stop = false;
            shared.force_restart = false;
            shared.control = Some(tx);
            inner.state.send_replace(MonitorState::Running);
            generation
        };

        let info = generation.info.clone();
        info!(monitor = %inner.id, pid = info.pid, command = %info.command_line(), "process started");
        inner.publish(inner.event(LifecycleKind::Start).with_process(&info));
        tokio::spawn(actor::supervise(Arc::clone(inner), generation, rx));
        Ok(info)
    }

    /// Stops the process for good: `SIGTERM`, then `SIGKILL` after the kill timeout.
    ///
    /// No restart happens after this, whatever the policy says.
    pub fn stop(&self) -> Result<(), MonitorError> {
        let inner = &self.inner;
        let info = {
            let mut shared = inner.lock();
            self.ensure_running(&shared)?;
            shared.force_stop = true;
            shared.info.clone()
        };
        let mut ev = inner.event(LifecycleKind::Stop);
        if let Some(info) = &info {
            ev = ev.with_process(info);
        }
        debug!(monitor = %inner.id, "stop requested");
        inner.publish(ev);
        self.signal(Control::Terminate);
        Ok(())
    }

    /// Makes the current process exit and relaunches it once, even when spinning.
    pub fn restart(&self) -> Result<(), MonitorError> {
        {
            let mut shared = self.inner.lock();
            self.ensure_running(&shared)?;
            shared.force_restart = true;
        }
        debug!(monitor = %self.inner.id, "restart requested");
        self.signal(Control::Terminate);
        Ok(())
    }

    pub fn state(&self) -> MonitorState {
        *self.inner.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == MonitorState::Running
    }

    /// Current (or last) process generation.
    pub fn info(&self) -> Option<ProcessInfo> {
        self.inner.lock().info.clone()
    }

    /// Restarts performed since the last `start()`.
    pub fn restart_count(&self) -> u32 {
        self.inner.lock().restart_count
    }

    /// Session of the current generation, once the child connected.
    pub fn session(&self) -> Option<RpcSession> {
        self.inner.session.borrow().clone()
    }

    /// Every session change: `Some` when a child connects, `None` when its generation ends.
    pub fn watch_sessions(&self) -> watch::Receiver<Option<RpcSession>> {
        self.inner.session.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<MonitorState> {
        self.inner.state.subscribe()
    }

    /// Waits until the monitor is no longer running and returns the final state.
    pub async fn wait_terminal(&self) -> MonitorState {
        let mut rx = self.inner.state.subscribe();
        match rx.wait_for(|s| *s != MonitorState::Running).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    pub fn subscribe(&self) -> LifecycleReceiver {
        self.inner.bus.subscribe()
    }

    pub fn bus(&self) -> &LifecycleBus {
        &self.inner.bus
    }

    fn ensure_running(&self, shared: &Shared) -> Result<(), MonitorError> {
        if *self.inner.state.borrow() == MonitorState::Running && shared.control.is_some() {
            return Ok(());
        }
        let err = MonitorError::NotRunning {
            id: self.inner.id.to_string(),
        };
        self.inner
            .publish(self.inner.event(LifecycleKind::Error).with_reason(err.to_string()));
        Err(err)
    }

    fn signal(&self, control: Control) {
        if let Some(tx) = &self.inner.lock().control {
            let _ = tx.send(control);
        }
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("id", &self.inner.id)
            .field("command", &self.inner.spec.command)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;
    use tokio::time::timeout;

    fn sh(script: &str) -> ProcessSpec {
        ProcessSpec::new("sh").args(["-c", script])
    }

    fn opts(policy: RestartPolicy) -> MonitorOptions {
        MonitorOptions {
            policy,
            kill_timeout: Duration::from_millis(200),
            ..MonitorOptions::default()
        }
    }

    async fn next(rx: &mut LifecycleReceiver) -> LifecycleEvent {
        timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("no lifecycle event within 10s")
            .expect("lifecycle bus closed")
    }

    async fn until_exit(rx: &mut LifecycleReceiver) -> Vec<LifecycleEvent> {
        let mut out = Vec::new();
        loop {
            let ev = next(rx).await;
            let done = ev.is_terminal();
            out.push(ev);
            if done {
                return out;
            }
        }
    }

    fn kinds(events: &[LifecycleEvent]) -> Vec<&'static str> {
        events
            .iter()
            .filter(|e| !matches!(e.kind, LifecycleKind::Stdout | LifecycleKind::Stderr))
            .map(|e| e.kind.as_label())
            .collect()
    }

    #[tokio::test]
    async fn stop_ends_in_stopped_without_restart() {
        let m = Monitor::new("sleeper", sh("exec sleep 30"), opts(RestartPolicy::forever(Duration::ZERO)));
        let mut rx = m.subscribe();

        let info = m.start().unwrap();
        assert_eq!(m.info().map(|i| i.pid), Some(info.pid));
        assert!(matches!(m.start(), Err(MonitorError::AlreadyRunning { .. })));

        m.stop().unwrap();
        let events = until_exit(&mut rx).await;
        assert_eq!(kinds(&events), ["start", "stop", "warn", "exit"]);

        let exit = events.last().unwrap();
        assert_eq!(exit.spinning, Some(false));
        assert_eq!(exit.reason.as_deref(), Some("stopped"));
        assert_eq!(m.wait_terminal().await, MonitorState::Stopped);
        assert_eq!(m.restart_count(), 0);
    }

    #[tokio::test]
    async fn spinning_without_sleep_exits() {
        let policy = RestartPolicy {
            min_uptime: Duration::from_secs(30),
            spin_sleep: None,
            max_restarts: None,
        };
        let m = Monitor::new("crasher", sh("exit 3"), opts(policy));
        let mut rx = m.subscribe();
        m.start().unwrap();

        let events = until_exit(&mut rx).await;
        assert_eq!(kinds(&events), ["start", "warn", "exit"]);
        assert_eq!(events[1].exit_code, Some(3));
        assert_eq!(events[2].spinning, Some(true));
        assert_eq!(m.state(), MonitorState::Exited);
    }

    #[tokio::test]
    async fn spinning_with_sleep_restarts_after_delay_until_budget() {
        let sleep = Duration::from_millis(50);
        let policy = RestartPolicy {
            min_uptime: Duration::from_secs(30),
            spin_sleep: Some(sleep),
            max_restarts: Some(3),
        };
        let m = Monitor::new("looper", sh("exit 1"), opts(policy));
        let mut rx = m.subscribe();
        m.start().unwrap();

        let events = until_exit(&mut rx).await;
        let launches: Vec<&LifecycleEvent> = events
            .iter()
            .filter(|e| matches!(e.kind, LifecycleKind::Start | LifecycleKind::Restart))
            .collect();
        assert_eq!(launches.len(), 4);
        for (n, pair) in launches.windows(2).enumerate() {
            assert_eq!(pair[1].restart_count, Some(n as u32 + 1));
            let gap = pair[1].at.duration_since(pair[0].at).unwrap_or_default();
            assert!(gap >= sleep, "restart {n} came after {gap:?}");
        }
        let delays = events.iter().filter(|e| e.delay_ms == Some(50)).count();
        assert_eq!(delays, 3);

        let exit = events.last().unwrap();
        assert_eq!(exit.spinning, Some(true));
        assert_eq!(exit.restart_count, Some(3));
        assert_eq!(m.state(), MonitorState::Exited);
    }

    #[tokio::test]
    async fn stop_during_spin_sleep_wins() {
        let policy = RestartPolicy {
            min_uptime: Duration::from_secs(30),
            spin_sleep: Some(Duration::from_secs(30)),
            max_restarts: None,
        };
        let m = Monitor::new("sleepy", sh("exit 1"), opts(policy));
        let mut rx = m.subscribe();
        m.start().unwrap();

        loop {
            if next(&mut rx).await.delay_ms.is_some() {
                break;
            }
        }
        m.stop().unwrap();
        let events = until_exit(&mut rx).await;
        assert!(events.iter().all(|e| e.kind != LifecycleKind::Restart));
        assert_eq!(m.wait_terminal().await, MonitorState::Stopped);
    }

    #[tokio::test]
    async fn restart_relaunches_and_counts() {
        let policy = RestartPolicy {
            min_uptime: Duration::ZERO,
            ..RestartPolicy::default()
        };
        let m = Monitor::new("web", sh("exec sleep 30"), opts(policy));
        let mut rx = m.subscribe();
        let first = m.start().unwrap();

        m.restart().unwrap();
        let restarted = loop {
            let ev = next(&mut rx).await;
            if ev.kind == LifecycleKind::Restart {
                break ev;
            }
        };
        assert_eq!(restarted.restart_count, Some(1));
        assert_ne!(restarted.pid, Some(first.pid));
        assert_eq!(m.restart_count(), 1);
        assert!(m.is_running());

        m.stop().unwrap();
        assert_eq!(m.wait_terminal().await, MonitorState::Stopped);
    }

    #[tokio::test]
    async fn stop_when_not_running_reports_error() {
        let m = Monitor::new("idle", sh("true"), MonitorOptions::default());
        let mut rx = m.subscribe();

        let err = m.stop().unwrap_err();
        assert_eq!(err.to_string(), "cannot stop process that is not running (idle)");
        assert_eq!(next(&mut rx).await.kind, LifecycleKind::Error);
        assert!(matches!(m.restart(), Err(MonitorError::NotRunning { .. })));
    }

    #[tokio::test]
    async fn spawn_failure_is_synchronous_and_leaves_idle() {
        let m = Monitor::new("ghost", ProcessSpec::new("/nonexistent/ghost"), MonitorOptions::default());
        let mut rx = m.subscribe();

        assert!(matches!(m.start(), Err(MonitorError::Spawn(_))));
        assert_eq!(m.state(), MonitorState::Idle);
        let ev = next(&mut rx).await;
        assert_eq!(ev.kind, LifecycleKind::Error);
        assert!(ev.reason.unwrap().contains("/nonexistent/ghost"));
    }

    #[tokio::test]
    async fn output_is_published_in_chunks() {
        let m = Monitor::new("talker", sh("echo hello; echo oops >&2; exec sleep 30"), opts(RestartPolicy::default()));
        let mut rx = m.subscribe();
        m.start().unwrap();

        let (mut out, mut err) = (String::new(), String::new());
        while !(out.contains("hello") && err.contains("oops")) {
            let ev = next(&mut rx).await;
            match ev.kind {
                LifecycleKind::Stdout => out.push_str(&ev.text().unwrap()),
                LifecycleKind::Stderr => err.push_str(&ev.text().unwrap()),
                _ => {}
            }
        }
        m.stop().unwrap();
        m.wait_terminal().await;
    }

    #[tokio::test]
    async fn ignored_sigterm_escalates_to_kill() {
        let m = Monitor::new("stubborn", sh("trap '' TERM; exec sleep 30"), opts(RestartPolicy::default()));
        m.start().unwrap();
        // give the shell time to install the trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let begin = SystemTime::now();
        m.stop().unwrap();
        assert_eq!(
            timeout(Duration::from_secs(5), m.wait_terminal()).await.unwrap(),
            MonitorState::Stopped
        );
        assert!(begin.elapsed().unwrap() >= Duration::from_millis(200));
    }
}
