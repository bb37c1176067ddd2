//! Relay client errors

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while delivering to the monitoring backend
#[derive(Debug, Error)]
pub enum RelayError {
    /// Opening a connection to the backend failed
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Writing a frame on the live connection failed
    #[error("Send failed: {0}")]
    Send(String),

    /// A transport round-trip did not finish in time
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation that was in flight
        operation: &'static str,
        /// Configured bound
        timeout: Duration,
    },

    /// Envelope could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Endpoint or handshake values are not usable
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}
