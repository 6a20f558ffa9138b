//! Error types for Code Play.

use thiserror::Error;

use crate::types::SandboxStatus;

/// Result type alias using Code Play's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Code Play.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Orchestrator Errors
    // =========================================================================
    /// Sandbox, container, project or template unknown to this service.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation requires the sandbox to be `running`.
    #[error("Sandbox {sandbox_id} is not running (status: {status})")]
    NotRunning {
        sandbox_id: String,
        status: SandboxStatus,
    },

    /// Bearer credential missing, invalid or expired.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A container backend call failed.
    #[error("Container runtime error: {0}")]
    Runtime(String),

    /// Malformed multiplexed stream frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Registry or record store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a not running error.
    pub fn not_running(sandbox_id: impl Into<String>, status: SandboxStatus) -> Self {
        Self::NotRunning {
            sandbox_id: sandbox_id.into(),
            status,
        }
    }

    /// Create an unauthorized error.
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create a container runtime error.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code, used in API error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::NotRunning { .. } => "NOT_RUNNING",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Runtime(_) => "RUNTIME_ERROR",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Serialization(_) | Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }
}
