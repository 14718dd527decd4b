//! fork/exec of one process generation.

use std::io;
use std::process::Stdio;

use tokio::process::{Child, Command};

use super::spec::{ProcessInfo, ProcessSpec};
use crate::error::SpawnError;

/// A freshly spawned child with its metadata.
pub(super) struct Spawned {
    pub child: Child,
    pub info: ProcessInfo,
}

/// Spawns `spec` with `extra` variables added last.
///
/// stdin is closed, stdout/stderr are piped. The child is killed if its handle is
/// dropped while it still runs.
pub(super) fn spawn(spec: &ProcessSpec, extra: &[(&str, String)]) -> Result<Spawned, SpawnError> {
    if spec.is_path() && !spec.command.exists() {
        return Err(SpawnError::NotFound {
            path: spec.command.clone(),
        });
    }

    let mut cmd = Command::new(&spec.command);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for key in &spec.hide_env {
        cmd.env_remove(key);
    }
    cmd.envs(&spec.env);
    for (key, value) in extra {
        cmd.env(key, value);
    }
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    if let Some(uid) = spec.uid {
        cmd.uid(uid);
    }
    if let Some(gid) = spec.effective_gid() {
        cmd.gid(gid);
    }

    let child = cmd.spawn().map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => SpawnError::NotFound {
            path: spec.command.clone(),
        },
        _ => SpawnError::Os {
            path: spec.command.clone(),
            source: e,
        },
    })?;
    let pid = child.id().ok_or_else(|| SpawnError::Os {
        path: spec.command.clone(),
        source: io::Error::other("process exited before its pid was read"),
    })?;

    Ok(Spawned {
        info: ProcessInfo::new(pid, spec),
        child,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_spawn_with_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ProcessSpec::new("sh")
            .args(["-c", "echo $GREETING $EXTRA; pwd -P"])
            .env("GREETING", "hello")
            .cwd(dir.path());

        let mut spawned = spawn(&spec, &[("EXTRA", "world".to_string())]).unwrap();
        assert!(spawned.info.pid > 0);

        let mut out = String::new();
        let mut stdout = spawned.child.stdout.take().unwrap();
        stdout.read_to_string(&mut out).await.unwrap();
        assert!(spawned.child.wait().await.unwrap().success());

        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("hello world"));
        let cwd = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(lines.next().map(std::path::PathBuf::from), Some(cwd));
    }

    #[tokio::test]
    async fn test_hidden_variables_are_removed() {
        let spec = ProcessSpec::new("sh")
            .args(["-c", "printf %s \"${HOME:-unset}\""])
            .hide_env("HOME");

        let mut spawned = spawn(&spec, &[]).unwrap();
        let mut out = String::new();
        spawned
            .child
            .stdout
            .take()
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        assert_eq!(out, "unset");
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let err = spawn(&ProcessSpec::new("/nonexistent/apiary-worker"), &[])
            .err()
            .unwrap();
        assert_eq!(err.as_label(), "spawn_not_found");

        let err = spawn(&ProcessSpec::new("nonexistent_command_12345"), &[])
            .err()
            .unwrap();
        assert_eq!(err.as_label(), "spawn_not_found");
    }
}
