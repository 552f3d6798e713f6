//! Error types for the fleetwatch agent

use thiserror::Error;

/// Errors that can occur while registering, reporting or persisting state
#[derive(Debug, Error)]
pub enum AgentError {
    /// Network/HTTP error
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Request did not complete in time
    #[error("Operation timed out")]
    Timeout,

    /// Malformed or incomplete response body
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server-returned credential differs from the locally derived one
    #[error("Credential mismatch: server={server}, local={local} (check the shared secret)")]
    CredentialMismatch { server: String, local: String },

    /// Response status the agent does not understand
    #[error("Unknown response status: {0}")]
    UnknownStatus(String),

    /// Non-2xx response that is not a deletion signal
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    /// Local persistence failure (queue database)
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shutdown requested while waiting
    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    /// Check if this is a network-related error
    pub fn is_transport(&self) -> bool {
        matches!(self, AgentError::Transport(_) | AgentError::Timeout)
    }

    /// Create a server error from status and message
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        AgentError::Server {
            status,
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        AgentError::Protocol(message.into())
    }
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;
