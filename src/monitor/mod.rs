//! Process supervision.
//!
//! ## Contents
//! - [`ProcessSpec`], [`ProcessInfo`] what to run and what is running
//! - [`RestartPolicy`], [`ExitContext`], [`ExitDecision`] the exit decision table
//! - [`Monitor`], [`MonitorOptions`], [`MonitorState`], [`IpcOptions`] the supervisor handle
//!
//! ## Quick wiring
//! ```text
//! Monitor::new(id, spec, opts) ─► start() ─► actor (wait / restart / stop)
//!        │                                      │
//!        ├─► subscribe() ◄──── LifecycleBus ◄────┤
//!        └─► watch_sessions() ◄── RpcSession per spawn
//! ```

mod actor;
mod policy;
mod spawner;
mod spec;
mod supervisor;

pub use policy::{ExitContext, ExitDecision, RestartPolicy};
pub use spec::{ProcessInfo, ProcessSpec};
pub use supervisor::{IpcOptions, Monitor, MonitorOptions, MonitorState};
