//! Relay session
//!
//! A `RelaySession` owns at most one live connection to the monitoring
//! backend. It connects lazily, never heals itself inside `deliver`, and
//! replaces its connection wholesale on `reconnect`.
//!
//! After a failed connect the session records the earliest instant at which
//! it may dial again (`retry_at`). The next `open` sleeps until then.

use crate::backoff::ExponentialBackoff;
use crate::error::RelayError;
use crate::models::{DeliveryFrame, Envelope, Handshake, MONITORING_CHANNEL};
use crate::transport::{Connection, Transport};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default bound on a single connect or send round-trip
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivery operations exposed to watchers.
#[async_trait::async_trait]
pub trait Relay: Send {
    /// Send one envelope. On transport failure the connection is dropped and
    /// the error returned; the caller decides whether to reconnect.
    async fn deliver(&mut self, envelope: &Envelope) -> Result<(), RelayError>;

    /// Close any existing connection and open a fresh one.
    async fn reconnect(&mut self) -> Result<(), RelayError>;
}

/// Static settings of a relay session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    endpoint: String,
    channel: String,
    client_id: Option<String>,
    io_timeout: Duration,
    backoff_min: Duration,
    backoff_max: Duration,
}

impl SessionConfig {
    /// Settings for `endpoint` on the monitoring channel with default timeouts
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            channel: MONITORING_CHANNEL.to_string(),
            client_id: None,
            io_timeout: DEFAULT_IO_TIMEOUT,
            backoff_min: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }

    /// Identify the agent to the backend
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Bound connect and send round-trips
    #[must_use]
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Delay range applied between consecutive failed connects
    #[must_use]
    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff_min = min;
        self.backoff_max = max;
        self
    }
}

struct ActiveConnection<C> {
    id: Uuid,
    inner: C,
}

/// Outbound delivery session to the monitoring backend.
pub struct RelaySession<T: Transport> {
    config: SessionConfig,
    transport: Arc<T>,
    connection: Option<ActiveConnection<T::Connection>>,
    backoff: ExponentialBackoff,
    failed_connects: u32,
    retry_at: Option<Instant>,
}

impl<T: Transport> RelaySession<T> {
    /// Create a disconnected session. The first delivery opens the connection.
    pub fn new(transport: Arc<T>, config: SessionConfig) -> Self {
        let backoff = ExponentialBackoff::new(config.backoff_min, config.backoff_max);
        Self {
            config,
            transport,
            connection: None,
            backoff,
            failed_connects: 0,
            retry_at: None,
        }
    }

    /// Earliest instant of the next connect attempt after a failure
    #[must_use]
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Whether a live connection handle is held
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Close and release the current connection, if any. Idempotent.
    pub async fn disconnect(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            debug!(connection = %connection.id, "Closing relay connection");
            if tokio::time::timeout(self.config.io_timeout, connection.inner.close())
                .await
                .is_err()
            {
                debug!(connection = %connection.id, "Relay connection close timed out");
            }
        }
    }

    async fn open(&mut self) -> Result<(), RelayError> {
        if let Some(retry_at) = self.retry_at {
            debug!(
                failures = self.failed_connects,
                "Waiting {:?} before reconnecting to relay backend",
                retry_at.saturating_duration_since(Instant::now())
            );
            tokio::time::sleep_until(retry_at).await;
        }

        let handshake = Handshake {
            channel: self.config.channel.clone(),
            client_id: self.config.client_id.clone(),
        };
        let connect = self.transport.connect(&self.config.endpoint, &handshake);
        let result = match tokio::time::timeout(self.config.io_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout {
                operation: "connect",
                timeout: self.config.io_timeout,
            }),
        };

        match result {
            Ok(inner) => {
                let id = Uuid::new_v4();
                info!(
                    connection = %id,
                    endpoint = %self.config.endpoint,
                    channel = %self.config.channel,
                    "Relay session connected"
                );
                self.failed_connects = 0;
                self.retry_at = None;
                self.backoff.reset();
                self.connection = Some(ActiveConnection { id, inner });
                Ok(())
            }
            Err(e) => {
                self.failed_connects = self.failed_connects.saturating_add(1);
                self.retry_at = Some(Instant::now() + self.backoff.next_backoff());
                warn!(
                    endpoint = %self.config.endpoint,
                    failures = self.failed_connects,
                    error = %e,
                    "Failed to connect relay session"
                );
                Err(e)
            }
        }
    }
}

#[async_trait::async_trait]
impl<T: Transport> Relay for RelaySession<T> {
    async fn deliver(&mut self, envelope: &Envelope) -> Result<(), RelayError> {
        let frame = serde_json::to_string(&DeliveryFrame {
            channel: &self.config.channel,
            envelope,
        })?;

        if self.connection.is_none() {
            self.open().await?;
        }
        let io_timeout = self.config.io_timeout;
        let Some(connection) = self.connection.as_mut() else {
            return Err(RelayError::Send("no live connection".to_string()));
        };

        let send = connection.inner.send_text(frame);
        let result = match tokio::time::timeout(io_timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout {
                operation: "send",
                timeout: io_timeout,
            }),
        };

        if let Err(e) = result {
            debug!(
                connection = %connection.id,
                error = %e,
                "Relay send failed, marking session disconnected"
            );
            self.disconnect().await;
            return Err(e);
        }
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), RelayError> {
        self.disconnect().await;
        self.open().await
    }
}

impl<T: Transport> fmt::Debug for RelaySession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaySession")
            .field("config", &self.config)
            .field("connection", &self.connection.as_ref().map(|c| c.id))
            .field("failed_connects", &self.failed_connects)
            .field("retry_at", &self.retry_at)
            .finish_non_exhaustive()
    }
}
