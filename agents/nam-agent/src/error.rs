//! Error types
//!
//! Typed failures surfaced by the applet manager to its callers (CLI commands
//! and RPC dispatch).

use serde::Serialize;
use thiserror::Error;

use crate::agent::options::{ManagerOptions, NetworkIdentity};

/// Result alias used throughout the agent core.
pub type Result<T> = std::result::Result<T, NamError>;

#[derive(Debug, Error)]
pub enum NamError {
    /// Persisted options of a live agent differ from the requested ones.
    #[error("Configuration does not match with existing Applet Manager")]
    ConfigurationConflict {
        requested: Box<ManagerOptions>,
        running: NetworkIdentity,
    },

    #[error("unauthenticated or token expired")]
    Unauthenticated,

    #[error("Wrong password")]
    WrongPassword,

    #[error("Wrong email")]
    WrongEmail,

    /// A container engine command failed.
    #[error("Container engine command `{operation}` failed: {source}")]
    Engine {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// The control plane could not be reached at the transport level.
    #[error("Server is not available: {path}")]
    ServerUnavailable {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// The control plane answered with a non-success status.
    #[error("Request to {path} failed with status {status}: {message}")]
    ControlPlane {
        path: String,
        status: u16,
        message: String,
    },

    #[error("Applet is not running")]
    AppletNotRunning,

    #[error("Unsupported applet runtime {na_type}@{na_version}")]
    UnsupportedRuntime { na_type: String, na_version: String },

    #[error("Applet request to {uri} returned status {status}")]
    AppletResponse {
        uri: String,
        status: u16,
        body: serde_json::Value,
    },

    #[error("Applet request to {uri} failed: {source}")]
    AppletRequest {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Invalid cron schedule `{schedule}`: {message}")]
    InvalidSchedule { schedule: String, message: String },

    #[error("Invalid RPC call: {0}")]
    Rpc(String),

    #[error("Device socket error: {0}")]
    Socket(String),

    #[error("Applet manager is shutting down")]
    ShuttingDown,

    #[error("Operation `{operation}` timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    #[error("State store error at {path}: {message}")]
    State { path: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl NamError {
    pub fn engine(operation: impl Into<String>, source: anyhow::Error) -> Self {
        NamError::Engine {
            operation: operation.into(),
            source,
        }
    }

    /// Stable machine-readable code, reported to RPC callers.
    pub fn code(&self) -> &'static str {
        match self {
            NamError::ConfigurationConflict { .. } => "CONFIGURATION_CONFLICT",
            NamError::Unauthenticated => "UNAUTHENTICATED",
            NamError::WrongPassword => "WRONG_PASSWORD",
            NamError::WrongEmail => "WRONG_EMAIL",
            NamError::Engine { .. } => "ENGINE_COMMAND_FAILED",
            NamError::ServerUnavailable { .. } => "SERVER_UNAVAILABLE",
            NamError::ControlPlane { .. } => "CONTROL_PLANE_ERROR",
            NamError::AppletNotRunning => "APPLET_NOT_RUNNING",
            NamError::UnsupportedRuntime { .. } => "UNSUPPORTED_RUNTIME",
            NamError::AppletResponse { .. } => "APPLET_RESPONSE_ERROR",
            NamError::AppletRequest { .. } => "APPLET_REQUEST_FAILED",
            NamError::InvalidSchedule { .. } => "INVALID_SCHEDULE",
            NamError::Rpc(_) => "INVALID_RPC",
            NamError::Socket(_) => "SOCKET_ERROR",
            NamError::ShuttingDown => "SHUTTING_DOWN",
            NamError::Timeout { .. } => "TIMEOUT",
            NamError::State { .. } => "STATE_ERROR",
            NamError::Io(_) => "IO_ERROR",
        }
    }

    pub fn to_payload(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Structured failure returned over the RPC channel and the HTTP surface.
#[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
