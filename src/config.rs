//! # Orchestrator configuration.
//!
//! [`Config`] is read once at startup from a JSON document. Every field has a
//! default, so `{}` is a valid configuration describing the three standard
//! subsystems with no service types registered.
//!
//! [`ConfigStore`] answers `get("a:b:0")` lookups against the same document for
//! components that only need one value.
//!
//! # Example
//! ```
//! use apiary::Config;
//!
//! let cfg = Config::from_json(r#"{
//!     "logging": {"level": "debug"},
//!     "subsystems": [
//!         {"name": "serviceEnv", "services": {"proxy": "/usr/bin/proxy"}, "stop_timeout": "2s"}
//!     ]
//! }"#).unwrap();
//!
//! assert_eq!(cfg.logging.level, "debug");
//! assert_eq!(cfg.store().get("subsystems:0:services:proxy").unwrap(), "/usr/bin/proxy");
//! ```

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::controller::ControllerConfig;
use crate::error::ConfigError;

/// Subsystems created when the configuration names none, in start order.
pub const DEFAULT_SUBSYSTEMS: [&str; 3] = ["serviceEnv", "resourceEnv", "apiEnv"];

/// Separator of [`ConfigStore`] paths.
pub const PATH_SEPARATOR: char = ':';

/// Top-level configuration of the master process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,

    /// One controller per entry. The orchestrator reorders the standard
    /// subsystems; the others keep their position after them.
    pub subsystems: Vec<ControllerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            subsystems: DEFAULT_SUBSYSTEMS
                .iter()
                .map(|name| ControllerConfig::named(*name))
                .collect(),
        }
    }
}

impl Config {
    /// Reads and parses a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn subsystem(&self, name: &str) -> Option<&ControllerConfig> {
        self.subsystems.iter().find(|s| s.name == name)
    }

    /// Path-addressable view of this configuration.
    pub fn store(&self) -> ConfigStore {
        ConfigStore::new(serde_json::to_value(self).unwrap_or_default())
    }
}

/// Logger sink settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub level: String,

    /// Appends plain-text logs to this file instead of writing to stderr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
        }
    }
}

/// Read-only JSON document addressed by `:`-separated paths.
///
/// Object keys and array indices share the same syntax: `subsystems:0:name`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigStore {
    root: Value,
}

impl ConfigStore {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    /// Value at `path`; the empty path is the whole document.
    pub fn get(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(&self.root);
        }
        path.split(PATH_SEPARATOR)
            .try_fold(&self.root, |node, key| match node {
                Value::Object(map) => map.get(key),
                Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }

    /// Value at `path`, deserialized into `T`.
    ///
    /// `None` when the path is absent or the value has another shape.
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        let value = self.get(path)?.clone();
        serde_json::from_value(value).ok()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }
}

impl From<Value> for ConfigStore {
    fn from(root: Value) -> Self {
        Self::new(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn empty_document_yields_standard_subsystems() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg, Config::default());
        let names: Vec<&str> = cfg.subsystems.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, DEFAULT_SUBSYSTEMS);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.logging.file.is_none());
    }

    #[test]
    fn explicit_subsystems_replace_defaults() {
        let cfg = Config::from_json(
            r#"{"subsystems": [{"name": "apiEnv", "kill_timeout": "1s"}]}"#,
        )
        .unwrap();
        assert_eq!(cfg.subsystems.len(), 1);
        let api = cfg.subsystem("apiEnv").unwrap();
        assert_eq!(api.kill_timeout, Duration::from_secs(1));
        assert_eq!(api.stop_timeout, Duration::from_secs(5));
        assert!(cfg.subsystem("serviceEnv").is_none());
    }

    #[test]
    fn invalid_documents_are_rejected() {
        let err = Config::from_json(r#"{"subsystems": 3}"#).unwrap_err();
        assert_eq!(err.as_label(), "config_parse");

        let err = Config::from_file("/nonexistent/apiary.json").unwrap_err();
        assert_eq!(err.as_label(), "config_read");
    }

    #[test]
    fn from_file_reads_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"logging": {{"level": "warn", "file": "/tmp/apiary.log"}}}}"#).unwrap();

        let cfg = Config::from_file(file.path()).unwrap();
        assert_eq!(cfg.logging.level, "warn");
        assert_eq!(cfg.logging.file, Some(PathBuf::from("/tmp/apiary.log")));
        assert_eq!(cfg.subsystems.len(), 3);
    }

    #[test]
    fn store_walks_objects_and_arrays() {
        let store = ConfigStore::new(json!({
            "a": {"b": [10, {"c": "deep"}]},
            "flag": true
        }));
        assert_eq!(store.get("a:b:0"), Some(&json!(10)));
        assert_eq!(store.get("a:b:1:c"), Some(&json!("deep")));
        assert_eq!(store.get(""), Some(&store.root));
        assert_eq!(store.get_as::<bool>("flag"), Some(true));

        assert!(store.get("a:b:2").is_none());
        assert!(store.get("a:b:x").is_none());
        assert!(store.get("flag:deeper").is_none());
        assert!(!store.contains("missing"));
        assert_eq!(store.get_as::<u32>("a:b:1:c"), None);
    }

    #[test]
    fn config_store_reflects_defaults() {
        let store = Config::default().store();
        assert_eq!(store.get_as::<String>("subsystems:1:name").as_deref(), Some("resourceEnv"));
        assert_eq!(store.get("subsystems:0:stop_timeout"), Some(&json!("5s")));
        assert_eq!(store.get("logging:level"), Some(&json!("info")));
    }
}
