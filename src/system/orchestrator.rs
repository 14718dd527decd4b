//! # Orchestrator: the master process object.
//!
//! Built once at startup from a [`Config`] and passed by reference to whoever
//! needs the root bus or a subsystem.
//!
//! ## Lifecycle
//! ```text
//! Orchestrator::new(config)
//!   └─► one Controller per subsystem, attached serviceEnv → resourceEnv → apiEnv → others
//!
//! run_until_signal()
//!   ├─► start()                   first failure: stop what started, return StartFailed
//!   ├─► wait_for_shutdown_signal()
//!   └─► shutdown()                reverse order; StopFailed if any service failed
//! ```

use std::sync::Arc;

use tracing::{error, info};

use super::router::SystemRouter;
use crate::bus::EventBus;
use crate::config::{Config, ConfigStore, DEFAULT_SUBSYSTEMS};
use crate::controller::{Controller, StopOutcome};
use crate::error::SystemError;
use crate::shutdown::wait_for_shutdown_signal;

/// Owner of the root router and every subsystem controller.
pub struct Orchestrator {
    config: Config,
    store: ConfigStore,
    router: SystemRouter,
    controllers: Vec<Arc<Controller>>,
}

impl Orchestrator {
    /// Builds and attaches one controller per configured subsystem.
    ///
    /// Standard subsystems come first in their dependency order; others follow in
    /// configuration order.
    pub fn new(config: Config) -> Result<Self, SystemError> {
        let router = SystemRouter::new();
        let mut ordered: Vec<_> = config.subsystems.iter().collect();
        ordered.sort_by_key(|cfg| {
            DEFAULT_SUBSYSTEMS
                .iter()
                .position(|name| *name == cfg.name)
                .unwrap_or(DEFAULT_SUBSYSTEMS.len())
        });

        let mut controllers = Vec::with_capacity(ordered.len());
        for cfg in ordered {
            let ctrl = Controller::new(cfg.clone());
            router.attach(ctrl.clone())?;
            controllers.push(ctrl);
        }

        Ok(Self {
            store: config.store(),
            config,
            router,
            controllers,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Path-addressable view of the configuration.
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn router(&self) -> &SystemRouter {
        &self.router
    }

    /// Root bus.
    pub fn bus(&self) -> &EventBus {
        self.router.bus()
    }

    pub fn controller(&self, name: &str) -> Option<Arc<Controller>> {
        self.controllers.iter().find(|c| c.name() == name).cloned()
    }

    /// Controllers in start order.
    pub fn controllers(&self) -> &[Arc<Controller>] {
        &self.controllers
    }

    pub async fn start(&self) -> Result<(), SystemError> {
        self.router.start().await
    }

    /// Stops every subsystem in reverse start order.
    pub async fn stop(&self) -> Vec<StopOutcome> {
        self.router.stop().await
    }

    /// [`stop`](Self::stop), folding failed outcomes into [`SystemError::StopFailed`].
    pub async fn shutdown(&self) -> Result<(), SystemError> {
        let failures: Vec<String> = self
            .stop()
            .await
            .into_iter()
            .filter_map(|o| o.error.map(|e| format!("{}: {e}", o.name)))
            .collect();
        if failures.is_empty() {
            info!("shutdown complete");
            Ok(())
        } else {
            error!(failed = failures.len(), "shutdown finished with errors");
            Err(SystemError::StopFailed { failures })
        }
    }

    /// Starts, waits for a termination signal, then shuts down.
    pub async fn run_until_signal(&self) -> Result<(), SystemError> {
        if let Err(e) = self.start().await {
            error!(error = %e, "startup failed, stopping what already runs");
            let _ = self.shutdown().await;
            return Err(e);
        }
        info!(subsystems = ?self.router.names(), "orchestrator running");

        let signal = match wait_for_shutdown_signal().await {
            Ok(signal) => signal,
            Err(e) => {
                let _ = self.shutdown().await;
                return Err(e.into());
            }
        };
        info!(signal, "shutdown signal received");
        self.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerConfig;

    #[test]
    fn standard_subsystems_come_first() {
        let config = Config {
            subsystems: vec![
                ControllerConfig::named("metrics"),
                ControllerConfig::named("apiEnv"),
                ControllerConfig::named("audit"),
                ControllerConfig::named("serviceEnv"),
                ControllerConfig::named("resourceEnv"),
            ],
            ..Config::default()
        };
        let orch = Orchestrator::new(config).unwrap();
        assert_eq!(
            orch.router().names(),
            ["serviceEnv", "resourceEnv", "apiEnv", "metrics", "audit"]
        );
        assert!(orch.controller("audit").is_some());
        assert!(orch.controller("nope").is_none());
        assert_eq!(orch.controllers().len(), 5);
    }

    #[test]
    fn duplicate_subsystem_names_fail() {
        let config = Config {
            subsystems: vec![ControllerConfig::named("apiEnv"), ControllerConfig::named("apiEnv")],
            ..Config::default()
        };
        assert!(matches!(
            Orchestrator::new(config),
            Err(SystemError::DuplicateSubsystem(n)) if n == "apiEnv"
        ));
    }

    #[tokio::test]
    async fn empty_orchestrator_starts_and_shuts_down() {
        let orch = Orchestrator::new(Config::default()).unwrap();
        assert_eq!(orch.store().get_as::<String>("subsystems:2:name").as_deref(), Some("apiEnv"));

        orch.start().await.unwrap();
        orch.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn failed_autostart_is_reported_by_subsystem() {
        let mut cfg = ControllerConfig::named("serviceEnv");
        cfg.autostart.push(crate::ServiceOptions::new("proxy"));
        let orch = Orchestrator::new(Config {
            subsystems: vec![cfg],
            ..Config::default()
        })
        .unwrap();

        let err = orch.start().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "subsystem `serviceEnv` failed to start: cannot return service for unknown type `proxy`"
        );
    }
}
