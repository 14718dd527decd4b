//! What to run, and what is known about the running process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;

/// Launch description for one supervised process.
///
/// Reused unchanged for every restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Executable; looked up in `PATH` when it has no separator.
    pub command: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Added on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Inherited variables removed before `env` is applied.
    pub hide_env: Vec<String>,
    pub uid: Option<u32>,
    /// Defaults to `uid` when unset.
    pub gid: Option<u32>,
}

impl ProcessSpec {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn hide_env(mut self, key: impl Into<String>) -> Self {
        self.hide_env.push(key.into());
        self
    }

    pub fn uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn gid(mut self, gid: u32) -> Self {
        self.gid = Some(gid);
        self
    }

    /// Group the process runs as: explicit `gid`, else `uid`.
    pub fn effective_gid(&self) -> Option<u32> {
        self.gid.or(self.uid)
    }

    /// Whether `command` names a file rather than a `PATH` lookup.
    pub(crate) fn is_path(&self) -> bool {
        self.command.components().count() > 1 || self.command.is_absolute()
    }
}

/// Snapshot of the current (or last) process generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub started_at: SystemTime,
    pub command: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl ProcessInfo {
    pub(crate) fn new(pid: u32, spec: &ProcessSpec) -> Self {
        Self {
            pid,
            started_at: SystemTime::now(),
            command: spec.command.clone(),
            args: spec.args.clone(),
            cwd: spec.cwd.clone(),
        }
    }

    /// Command and arguments joined by spaces, for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(display(&self.command))
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gid_falls_back_to_uid() {
        assert_eq!(ProcessSpec::new("x").uid(1000).effective_gid(), Some(1000));
        assert_eq!(ProcessSpec::new("x").uid(1000).gid(50).effective_gid(), Some(50));
        assert_eq!(ProcessSpec::new("x").effective_gid(), None);
    }

    #[test]
    fn path_detection() {
        assert!(ProcessSpec::new("/bin/sh").is_path());
        assert!(ProcessSpec::new("./svc").is_path());
        assert!(!ProcessSpec::new("sh").is_path());
    }

    #[test]
    fn command_line_joins_args() {
        let spec = ProcessSpec::new("/bin/echo").args(["hi", "there"]);
        assert_eq!(ProcessInfo::new(7, &spec).command_line(), "/bin/echo hi there");
    }
}
