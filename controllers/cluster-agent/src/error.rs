//! Agent-specific error types.
//!
//! `AgentError` covers bootstrap and process-level failures. `WatchError`
//! covers failures inside a watcher loop; those never leave the watcher.

use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can stop the agent process.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// HTTP listener error
    #[error("HTTP server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Errors raised inside a resource watcher. All of them end in a restart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    /// The change stream could not be opened
    #[error("Failed to acquire watch: {0}")]
    Acquire(String),

    /// The stream yielded an object that does not decode as the watched type
    #[error("Unexpected object type: {0}")]
    TypeMismatch(String),

    /// The stream reported an error (e.g. expired resource version)
    #[error("Watch stream error: {0}")]
    Stream(String),
}
