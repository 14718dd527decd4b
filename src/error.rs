//! Error types used by the apiary runtime.
//!
//! Errors are grouped by the layer that raises them:
//!
//! - [`SpawnError`] / [`MonitorError`]: the process supervisor (fork/exec, state misuse).
//! - [`TransportError`] / [`RpcError`]: the IPC channel and the request/response session on top.
//! - [`ControllerError`]: service registry lookups and start/stop handshakes.
//! - [`SystemError`] / [`ConfigError`]: the orchestrator and its configuration.
//!
//! Every enum provides `as_label` (stable snake_case, for logs) in the same way.
//! Runtime failures after a successful spawn (crash, spin) are never errors:
//! they travel as lifecycle events.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// # Errors produced while spawning a child process.
///
/// Surfaced synchronously from [`Monitor::start`](crate::Monitor::start) and never retried.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The executable does not exist.
    #[error("executable not found: {path}")]
    NotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// The OS refused to fork/exec (permissions, resource limits, ...).
    #[error("failed to spawn {path}: {source}")]
    Os {
        /// Executable that was spawned.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The IPC rendezvous socket could not be prepared.
    #[error("failed to prepare ipc socket: {0}")]
    Ipc(#[source] io::Error),
}

impl SpawnError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SpawnError::NotFound { .. } => "spawn_not_found",
            SpawnError::Os { .. } => "spawn_os",
            SpawnError::Ipc(_) => "spawn_ipc",
        }
    }
}

/// # Errors produced by the process supervisor.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Spawning the process failed.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// `start()` was called while the process is running.
    #[error("process {id} is already running")]
    AlreadyRunning {
        /// Supervisor id.
        id: String,
    },

    /// `stop()`/`restart()` was called while no process is running.
    #[error("cannot stop process that is not running ({id})")]
    NotRunning {
        /// Supervisor id.
        id: String,
    },
}

impl MonitorError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use apiary::MonitorError;
    ///
    /// let err = MonitorError::NotRunning { id: "web".into() };
    /// assert_eq!(err.as_label(), "monitor_not_running");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            MonitorError::Spawn(e) => e.as_label(),
            MonitorError::AlreadyRunning { .. } => "monitor_already_running",
            MonitorError::NotRunning { .. } => "monitor_not_running",
        }
    }
}

/// # Errors produced by a [`ChannelTransport`](crate::ChannelTransport).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TransportError {
    /// Reading from or writing to the underlying stream failed.
    #[error("transport io: {0}")]
    Io(#[from] io::Error),

    /// An incoming frame exceeded the maximum line length or could not be decoded.
    #[error("transport framing: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    /// An outgoing message serialized to more than the frame limit; nothing was written.
    #[error("message of {len} bytes exceeds the {max} byte frame limit")]
    Oversized {
        /// Serialized length.
        len: usize,
        /// Frame limit.
        max: usize,
    },

    /// A frame was not a valid message envelope.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// The child was started without an IPC rendezvous.
    #[error("environment variable {var} is not set")]
    NotConfigured {
        /// Name of the missing variable.
        var: &'static str,
    },
}

impl TransportError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            TransportError::Io(_) => "transport_io",
            TransportError::Codec(_) => "transport_codec",
            TransportError::Oversized { .. } => "transport_oversized",
            TransportError::Json(_) => "transport_json",
            TransportError::NotConfigured { .. } => "transport_not_configured",
        }
    }

    /// Whether the stream is unusable after this error.
    ///
    /// A well-framed line that is not a valid envelope only loses that line, and an
    /// oversized outgoing message is rejected before anything is written. Framing
    /// errors end the read stream, so they are fatal like io failures.
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::Io(_)
            | TransportError::Codec(_)
            | TransportError::NotConfigured { .. } => true,
            TransportError::Json(_) | TransportError::Oversized { .. } => false,
        }
    }
}

/// # Errors delivered to the caller of a cross-process call.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The session was torn down while the call was outstanding.
    #[error("session closed")]
    SessionClosed,

    /// The remote side never declared this function.
    #[error("unknown remote function `{0}`")]
    UnknownFunction(String),

    /// The remote side answered with an error.
    #[error("remote error: {0}")]
    Remote(String),

    /// The request could not be sent (e.g. it exceeds the frame limit).
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl RpcError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use apiary::RpcError;
    ///
    /// assert_eq!(RpcError::SessionClosed.as_label(), "rpc_session_closed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RpcError::SessionClosed => "rpc_session_closed",
            RpcError::UnknownFunction(_) => "rpc_unknown_function",
            RpcError::Remote(_) => "rpc_remote",
            RpcError::Rejected(_) => "rpc_rejected",
        }
    }
}

/// # Errors produced by a service [`Controller`](crate::Controller).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ControllerError {
    /// No executable is registered for this service type.
    #[error("cannot return service for unknown type `{0}`")]
    UnknownType(String),

    /// No service with this name is registered.
    #[error("service `{0}` does not exist")]
    UnknownName(String),

    /// The service type is already registered.
    #[error("a service type with this name ({0}) already exists")]
    DuplicateType(String),

    /// A service with this name is already running.
    #[error("a service with this name ({0}) already exists")]
    DuplicateName(String),

    /// Another stop for this service is already in flight.
    #[error("service `{0}` is not running")]
    NotRunning(String),

    /// The stop handshake did not complete in time.
    #[error("service `{name}` did not stop within {timeout:?}")]
    Timeout {
        /// Service name.
        name: String,
        /// Handshake deadline that was exceeded.
        timeout: Duration,
    },

    /// The child answered a handshake with an error.
    #[error("service `{name}` failed to {phase}: {reason}")]
    ServiceFailed {
        /// Service name.
        name: String,
        /// `start` or `stop`.
        phase: &'static str,
        /// Error reported by the child.
        reason: String,
    },

    /// The process terminated before completing its start handshake.
    #[error("service `{0}` exited before it became ready")]
    Exited(String),

    /// Supervisor failure (spawn errors included).
    #[error(transparent)]
    Monitor(#[from] MonitorError),

    /// Cross-process call failure.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl ControllerError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use apiary::ControllerError;
    /// use std::time::Duration;
    ///
    /// let err = ControllerError::Timeout { name: "alice".into(), timeout: Duration::from_secs(5) };
    /// assert_eq!(err.as_label(), "controller_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ControllerError::UnknownType(_) => "controller_unknown_type",
            ControllerError::UnknownName(_) => "controller_unknown_name",
            ControllerError::DuplicateType(_) => "controller_duplicate_type",
            ControllerError::DuplicateName(_) => "controller_duplicate_name",
            ControllerError::NotRunning(_) => "controller_not_running",
            ControllerError::Timeout { .. } => "controller_timeout",
            ControllerError::ServiceFailed { .. } => "controller_service_failed",
            ControllerError::Exited(_) => "controller_exited",
            ControllerError::Monitor(e) => e.as_label(),
            ControllerError::Rpc(e) => e.as_label(),
        }
    }
}

/// # Errors produced by the orchestrator.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SystemError {
    /// Two subsystems share a name.
    #[error("subsystem `{0}` is already attached")]
    DuplicateSubsystem(String),

    /// A subsystem failed to start.
    #[error("subsystem `{name}` failed to start: {source}")]
    StartFailed {
        /// Subsystem name.
        name: String,
        /// First error raised while starting it.
        #[source]
        source: ControllerError,
    },

    /// Shutdown finished but some services reported errors.
    #[error("shutdown finished with {} failed service(s): {failures:?}", failures.len())]
    StopFailed {
        /// `name: error` for every failed stop.
        failures: Vec<String>,
    },

    /// A root-bus request reached no handler that answered it.
    #[error("no subsystem answered `{0}`")]
    Unanswered(String),

    /// Signal handlers could not be installed.
    #[error("signal registration failed: {0}")]
    Signal(#[from] io::Error),
}

impl SystemError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SystemError::DuplicateSubsystem(_) => "system_duplicate_subsystem",
            SystemError::StartFailed { .. } => "system_start_failed",
            SystemError::StopFailed { .. } => "system_stop_failed",
            SystemError::Unanswered(_) => "system_unanswered",
            SystemError::Signal(_) => "system_signal",
        }
    }
}

/// # Errors produced while loading configuration.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying io error.
        #[source]
        source: io::Error,
    },

    /// The document is not valid JSON or does not match the schema.
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "config_read",
            ConfigError::Parse(_) => "config_parse",
        }
    }
}
