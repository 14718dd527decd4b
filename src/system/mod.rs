//! Top-level routing.
//!
//! ## Contents
//! - [`Subsystem`] owned domain (a [`Controller`](crate::Controller) in practice)
//! - [`SystemRouter`] root bus routing `<subsystem>::…` downward and mirroring `log::…` upward
//! - [`Orchestrator`] the master process object built from a [`Config`](crate::Config)

mod orchestrator;
mod router;
mod subsystem;

pub use orchestrator::Orchestrator;
pub use router::{LOG_PREFIX, SystemRouter};
pub use subsystem::{Subsystem, SubsystemRef};
