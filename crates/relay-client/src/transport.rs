//! Transport traits
//!
//! A `Transport` dials the backend and hands back a `Connection`. Sessions own
//! exactly one connection at a time; tests swap in the in-memory mock.

use crate::error::RelayError;
use crate::models::Handshake;

/// One live connection to the monitoring backend.
#[async_trait::async_trait]
pub trait Connection: Send {
    /// Write one text frame.
    async fn send_text(&mut self, frame: String) -> Result<(), RelayError>;

    /// Close the connection. Errors are swallowed: the connection is being discarded.
    async fn close(&mut self);
}

/// Factory for backend connections.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connection type produced by this transport
    type Connection: Connection + 'static;

    /// Open a new connection and announce the handshake values.
    async fn connect(
        &self,
        endpoint: &str,
        handshake: &Handshake,
    ) -> Result<Self::Connection, RelayError>;
}
