//! Relay Client
//!
//! Delivers cluster change notifications from the agent to the remote
//! monitoring backend over an outbound-only connection.
//!
//! # Example
//!
//! ```no_run
//! use relay_client::{
//!     Envelope, EventKind, Relay, RelaySession, ResourceType, SessionConfig, WebSocketTransport,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(WebSocketTransport::new());
//! let config = SessionConfig::new("ws://backend:8080/monitoring").with_client_id("cluster-a");
//! let mut session = RelaySession::new(transport, config);
//!
//! let envelope = Envelope::new(
//!     "default",
//!     EventKind::Added,
//!     ResourceType::Pods,
//!     serde_json::json!({"metadata": {"name": "pod-a"}}),
//! );
//! session.deliver(&envelope).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Lazy connection**: a session connects on first delivery
//! - **Explicit reconnect**: callers decide when to tear down and redial
//! - **Bounded backoff**: consecutive connect failures are spaced out
//! - **Shared sessions**: one connection serialized across several watchers

pub mod backoff;
pub mod error;
pub mod models;
pub mod session;
pub mod shared;
pub mod transport;
pub mod websocket;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use backoff::ExponentialBackoff;
pub use error::RelayError;
pub use models::*;
pub use session::{Relay, RelaySession, SessionConfig};
pub use shared::{RelayHandle, SessionFactory, SharedRelaySession};
pub use transport::{Connection, Transport};
pub use websocket::WebSocketTransport;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockTransport;
