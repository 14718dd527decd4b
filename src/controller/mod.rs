//! Service controller: named registry of supervised children.
//!
//! ## Contents
//! - [`ControllerConfig`], [`ServiceOptions`] per-subsystem and per-service settings
//! - [`Controller`] type registry, service registry, start/stop handshakes
//! - [`ServiceHandle`] one registered service (monitor, session, mirror bus)
//! - [`StopOutcome`] one slot of a controller-wide stop
//!
//! ## Event names on [`Controller::bus`]
//! ```text
//! <name>::start|restart|stop|exit|stdout|stderr|error|warn   lifecycle, [metadata]
//! <name>::rpcready                                            session declared, [functions]
//! <name>::running                                             start handshake done, [results…]
//! <name>::stopped                                             stop finished, [null | error]
//! <name>::<anything>                                          emitted by the child
//! ```

mod config;
mod core;
mod service;

pub use config::{ControllerConfig, ServiceOptions};
pub use core::{Controller, MANAGEMENT_PREFIX, START_EVENT, STOP_EVENT, StopOutcome};
pub use service::ServiceHandle;
