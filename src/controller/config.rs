//! Controller and per-service configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::monitor::RestartPolicy;

/// Configuration of one [`Controller`](crate::Controller) (one subsystem).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Subsystem name, also the routing prefix on the root bus.
    pub name: String,

    /// Default deadline of the stop handshake.
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,

    /// Grace period between `SIGTERM` and `SIGKILL`.
    #[serde(with = "humantime_serde")]
    pub kill_timeout: Duration,

    /// Restart policy of services that do not bring their own.
    pub restart: RestartPolicy,

    /// Directory for the per-spawn IPC sockets.
    pub ipc_dir: PathBuf,

    /// Capacity of every service's lifecycle channel.
    pub bus_capacity: usize,

    /// Service-type registry: type name → executable.
    pub services: BTreeMap<String, PathBuf>,

    /// Services started, in order, when the subsystem starts.
    pub autostart: Vec<ServiceOptions>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: "controller".into(),
            stop_timeout: Duration::from_secs(5),
            kill_timeout: Duration::from_secs(5),
            restart: RestartPolicy::default(),
            ipc_dir: default_ipc_dir(),
            bus_capacity: 1024,
            services: BTreeMap::new(),
            autostart: Vec::new(),
        }
    }
}

impl ControllerConfig {
    /// Default configuration under `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// `$TMPDIR/apiary`
pub(crate) fn default_ipc_dir() -> PathBuf {
    std::env::temp_dir().join("apiary")
}

/// Options of one `start_service` call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceOptions {
    /// Unique within the controller; generated as `<type>Service<N>` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Registered service type.
    #[serde(rename = "type")]
    pub service_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,

    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,

    /// Handed verbatim to the child with the `start` handshake.
    pub service_options: Value,

    /// Overrides the controller restart policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<RestartPolicy>,
}

impl ServiceOptions {
    pub fn new(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
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

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn options(mut self, options: Value) -> Self {
        self.service_options = options;
        self
    }

    pub fn restart(mut self, policy: RestartPolicy) -> Self {
        self.restart = Some(policy);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn options_use_type_key() {
        let opts: ServiceOptions = serde_json::from_value(json!({
            "type": "drone",
            "name": "alice",
            "uid": 1000,
            "service_options": {"port": 8080}
        }))
        .unwrap();
        assert_eq!(opts.service_type, "drone");
        assert_eq!(opts.name.as_deref(), Some("alice"));
        assert_eq!(opts.gid, None);
        assert_eq!(opts.service_options["port"], 8080);

        let back = serde_json::to_value(ServiceOptions::new("proxy")).unwrap();
        assert_eq!(back["type"], "proxy");
        assert!(back.get("name").is_none());
    }

    #[test]
    fn controller_config_defaults_and_durations() {
        let cfg: ControllerConfig = serde_json::from_value(json!({
            "name": "resourceEnv",
            "stop_timeout": "250ms",
            "services": {"drone": "/usr/bin/drone"}
        }))
        .unwrap();
        assert_eq!(cfg.stop_timeout, Duration::from_millis(250));
        assert_eq!(cfg.kill_timeout, Duration::from_secs(5));
        assert_eq!(cfg.services["drone"], PathBuf::from("/usr/bin/drone"));
        assert!(cfg.ipc_dir.ends_with("apiary"));
    }
}
