//! # Supervision actor: one task per started monitor.
//!
//! ```text
//! launch() ── spawn child ──┬─► stdout pump ──► Stdout events
//!                           ├─► stderr pump ──► Stderr events
//!                           └─► accept ipc ──► RpcSession ──► Inner::session
//!
//! supervise():
//! loop {
//!   ├─► wait for exit (Terminate → SIGTERM, kill_timeout later → SIGKILL)
//!   ├─► end generation: cancel, close session, release child
//!   ├─► publish Warn(exit_code, spinning)
//!   ├─► RestartPolicy::decide
//!   │     ├─► Stopped / Exited → finish, return
//!   │     ├─► RestartAfter(d)  → publish Warn(delay), cancellable sleep
//!   │     └─► RestartNow
//!   └─► launch() again, restart_count += 1, publish Restart
//! }
//! ```
//!
//! ## Rules
//! - Only this task touches the [`Child`]; it is dropped right after the session closes.
//! - A `stop()` during a pending delayed restart ends supervision without relaunching.

use std::os::unix::process::ExitStatusExt;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::policy::{ExitContext, ExitDecision};
use super::spawner::{self, Spawned};
use super::spec::ProcessInfo;
use super::supervisor::{Inner, MonitorState, Shared};
use crate::error::SpawnError;
use crate::lifecycle::LifecycleKind;
use crate::rpc::RpcSession;
use crate::transport::{IPC_SOCKET_ENV, IpcListener};

/// Largest output chunk forwarded as one event.
const OUTPUT_CHUNK: usize = 8 * 1024;

/// Requests from the [`Monitor`](super::Monitor) handle.
#[derive(Debug, Clone, Copy)]
pub(super) enum Control {
    /// Make the current process exit; `force_stop`/`force_restart` say what happens next.
    Terminate,
}

/// One spawned process and the token bounding its helpers.
pub(super) struct Generation {
    pub child: Child,
    pub info: ProcessInfo,
    pub cancel: CancellationToken,
}

/// Spawns one generation: child, output pumps and (optionally) the IPC rendezvous.
pub(super) fn launch(inner: &Arc<Inner>, shared: &mut Shared) -> Result<Generation, SpawnError> {
    let listener = match &inner.opts.ipc {
        Some(ipc) => Some(IpcListener::bind(&ipc.dir, &inner.id).map_err(SpawnError::Ipc)?),
        None => None,
    };
    let extra: Vec<(&str, String)> = listener
        .iter()
        .map(|l| (IPC_SOCKET_ENV, l.path().to_string_lossy().into_owned()))
        .collect();

    let Spawned { mut child, info } = spawner::spawn(&inner.spec, &extra)?;
    let cancel = CancellationToken::new();

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump(Arc::clone(inner), stdout, LifecycleKind::Stdout, info.pid));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump(Arc::clone(inner), stderr, LifecycleKind::Stderr, info.pid));
    }
    if let Some(listener) = listener {
        tokio::spawn(accept(Arc::clone(inner), listener, cancel.clone()));
    }

    shared.info = Some(info.clone());
    Ok(Generation {
        child,
        info,
        cancel,
    })
}

/// Runs until the policy or a `stop()` ends supervision.
pub(super) async fn supervise(
    inner: Arc<Inner>,
    mut generation: Generation,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    loop {
        let Generation {
            mut child,
            info,
            cancel,
        } = generation;

        let status = wait_exit(&inner, &mut child, info.pid, &mut control).await;
        inner.end_generation(&cancel);
        drop(child);

        let uptime = info.started_at.elapsed().unwrap_or_default();
        let spinning = inner.opts.policy.is_spinning(uptime);
        let (exit_code, reason) = describe(status);
        info!(monitor = %inner.id, pid = info.pid, ?exit_code, spinning, uptime_ms = uptime.as_millis() as u64, "process exited");
        inner.publish(
            inner
                .event(LifecycleKind::Warn)
                .with_pid(info.pid)
                .with_exit_code(exit_code)
                .with_spinning(spinning)
                .with_reason(reason),
        );

        let ctx = {
            let mut shared = inner.lock();
            ExitContext {
                force_stop: shared.force_stop,
                force_restart: std::mem::take(&mut shared.force_restart),
                spinning,
                restart_count: shared.restart_count,
            }
        };
        match inner.opts.policy.decide(ctx) {
            ExitDecision::Stopped => return inner.finish(MonitorState::Stopped, false),
            ExitDecision::Exited { spinning } => return inner.finish(MonitorState::Exited, spinning),
            ExitDecision::RestartAfter(delay) => {
                warn!(monitor = %inner.id, delay_ms = delay.as_millis() as u64, "process is spinning, delaying restart");
                inner.publish(
                    inner
                        .event(LifecycleKind::Warn)
                        .with_delay(delay)
                        .with_reason("restarting spinning process"),
                );
                if !sleep_unless_stopped(&inner, delay, &mut control).await {
                    return inner.finish(MonitorState::Stopped, false);
                }
            }
            ExitDecision::RestartNow => {}
        }

        generation = match relaunch(&inner) {
            Ok(next) => next,
            Err(e) => {
                warn!(monitor = %inner.id, error = %e, "relaunch failed");
                inner.publish(inner.event(LifecycleKind::Error).with_reason(e.to_string()));
                return inner.finish(MonitorState::Exited, spinning);
            }
        };
    }
}

fn relaunch(inner: &Arc<Inner>) -> Result<Generation, SpawnError> {
    let (generation, restart_count) = {
        let mut shared = inner.lock();
        let generation = launch(inner, &mut shared)?;
        shared.restart_count += 1;
        (generation, shared.restart_count)
    };
    info!(monitor = %inner.id, pid = generation.info.pid, restart_count, "process restarted");
    inner.publish(
        inner
            .event(LifecycleKind::Restart)
            .with_process(&generation.info)
            .with_restart_count(restart_count),
    );
    Ok(generation)
}

/// Waits for the child to exit, honouring terminate requests meanwhile.
async fn wait_exit(
    inner: &Inner,
    child: &mut Child,
    pid: u32,
    control: &mut mpsc::UnboundedReceiver<Control>,
) -> Option<std::process::ExitStatus> {
    let mut kill_at: Option<Instant> = None;
    loop {
        let deadline = async move {
            match kill_at {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            status = child.wait() => {
                return match status {
                    Ok(status) => Some(status),
                    Err(e) => {
                        warn!(monitor = %inner.id, pid, error = %e, "failed to wait for process");
                        None
                    }
                };
            }
            Some(Control::Terminate) = control.recv() => {
                terminate(pid);
                kill_at.get_or_insert_with(|| Instant::now() + inner.opts.kill_timeout);
            }
            _ = deadline => {
                warn!(monitor = %inner.id, pid, "process ignored SIGTERM, killing");
                if let Err(e) = child.start_kill() {
                    debug!(monitor = %inner.id, pid, error = %e, "kill failed");
                }
                kill_at = None;
            }
        }
    }
}

/// Sleeps `delay`; returns `false` when a stop arrived first.
async fn sleep_unless_stopped(
    inner: &Inner,
    delay: Duration,
    control: &mut mpsc::UnboundedReceiver<Control>,
) -> bool {
    tokio::select! {
        _ = time::sleep(delay) => {}
        Some(Control::Terminate) = control.recv() => {
            // restart() while waiting relaunches right away
            inner.lock().force_restart = false;
        }
    }
    !inner.lock().force_stop
}

fn terminate(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        debug!(pid, error = %e, "SIGTERM failed");
    }
}

fn describe(status: Option<std::process::ExitStatus>) -> (Option<i32>, String) {
    match status {
        Some(s) => match (s.code(), s.signal()) {
            (Some(code), _) => (Some(code), format!("exited with code {code}")),
            (None, Some(sig)) => (None, format!("terminated by signal {sig}")),
            (None, None) => (None, "exited".to_string()),
        },
        None => (None, "exit status unavailable".to_string()),
    }
}

async fn pump<R>(inner: Arc<Inner>, mut reader: R, kind: LifecycleKind, pid: u32)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; OUTPUT_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => inner.publish(inner.event(kind).with_pid(pid).with_data(&buf[..n])),
            Err(e) => {
                debug!(monitor = %inner.id, pid, error = %e, "output pump stopped");
                break;
            }
        }
    }
}

async fn accept(inner: Arc<Inner>, listener: IpcListener, cancel: CancellationToken) {
    let transport = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        accepted = listener.accept() => match accepted {
            Ok(transport) => transport,
            Err(e) => {
                warn!(monitor = %inner.id, error = %e, "ipc accept failed");
                inner.publish(inner.event(LifecycleKind::Error).with_reason(format!("ipc accept failed: {e}")));
                return;
            }
        },
    };
    drop(listener);

    let api = inner
        .opts
        .ipc
        .as_ref()
        .map(|ipc| ipc.api.clone())
        .unwrap_or_default();
    let session = RpcSession::start(Arc::clone(&inner.id), transport, api);
    debug!(monitor = %inner.id, session = session.id(), "child connected");
    inner.install_session(session, &cancel);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_description() {
        use std::process::ExitStatus;
        assert_eq!(
            describe(Some(ExitStatus::from_raw(3 << 8))),
            (Some(3), "exited with code 3".to_string())
        );
        assert_eq!(
            describe(Some(ExitStatus::from_raw(9))),
            (None, "terminated by signal 9".to_string())
        );
        assert_eq!(describe(None).0, None);
    }
}
