//! Error types
//!
//! One enum per failure concern. Provisioning, handoff and engine failures
//! all end the same way (the session falls back to Idle), so they are also
//! gathered into [`SessionError`] for the worker's transition logic.

use std::time::Duration;

/// The OS refused to create the virtual interface.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Interface provisioning refused: {0}")]
    Refused(#[source] anyhow::Error),

    #[error("Interface provisioning timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provisioning task aborted")]
    Aborted,
}

/// Detaching the interface descriptor produced nothing the engine can use.
#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("Detach returned invalid descriptor {0}")]
    InvalidDescriptor(i64),

    #[error("Detach failed: {0}")]
    DetachFailed(#[source] anyhow::Error),
}

/// The forwarding engine rejected a call or did not answer in time.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine {op} failed: {source}")]
    Rejected {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Engine {op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("Engine {op} aborted")]
    Aborted { op: &'static str },
}

/// Writing or reading the durable connected flag failed.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed state document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Persistence timed out after {0:?}")]
    Timeout(Duration),

    #[error("Persistence task aborted")]
    Aborted,
}

/// Any failure that sends a connecting session back to Idle.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Handoff(#[from] HandoffError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl SessionError {
    /// Short tag used in diagnostic lines
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Provision(_) => "provision",
            SessionError::Handoff(_) => "handoff",
            SessionError::Engine(_) => "engine",
        }
    }
}

/// Misuse of the controller handle.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Session worker is no longer running")]
    WorkerGone,

    #[error("Controller must be created inside a Tokio runtime")]
    NoRuntime,

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("No active tunnel")]
    NotConnected,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported config format")]
    UnsupportedFormat,

    #[error("MTU {0} out of range (576-9000)")]
    InvalidMtu(u16),

    #[error("Prefix length {0} out of range for IPv4")]
    InvalidPrefix(u8),

    #[error("Invalid proxy endpoint: {0}")]
    InvalidProxyEndpoint(String),

    #[error("Timeout `{0}` must be non-zero")]
    ZeroTimeout(&'static str),

    #[error("Diagnostic buffer capacity must be non-zero")]
    ZeroCapacity,
}
