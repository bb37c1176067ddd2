//! Resource watchers.
//!
//! A `ResourceWatcher` mirrors one resource type to the relay session.
//! It cycles STARTING → STREAMING → RESTARTING forever and only reaches
//! STOPPING on shutdown. Every failure is handled inside the loop.

use crate::envelope::build_envelope;
use crate::error::WatchError;
use crate::source::{ChangeSource, ChangeStream};
use crate::timer::{LifetimeTimer, WatchLifetime};
use futures::StreamExt;
use kube::Resource;
use relay_client::{Envelope, ExponentialBackoff, Relay, ResourceType};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Watcher lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Starting,
    Streaming,
    Restarting,
    Stopping,
}

/// Why a subscription was abandoned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    /// Watch lifetime ceiling reached
    LifetimeExpired,
    /// Stream ended without shutdown
    StreamClosed,
    /// Stream yielded an object of unexpected shape
    TypeMismatch(String),
    /// Stream reported an error
    StreamError(String),
}

impl RestartReason {
    /// Restarts caused by a broken stream are spaced out by the backoff
    fn is_failure(&self) -> bool {
        matches!(self, Self::TypeMismatch(_) | Self::StreamError(_))
    }
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LifetimeExpired => f.write_str("watch lifetime expired"),
            Self::StreamClosed => f.write_str("stream closed"),
            Self::TypeMismatch(e) => write!(f, "type mismatch: {e}"),
            Self::StreamError(e) => write!(f, "stream error: {e}"),
        }
    }
}

enum StreamExit {
    Restart(RestartReason),
    Shutdown,
}

/// Result of relaying one envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    DeliveredAfterRetry,
    Dropped,
}

/// Running delivery counters of one watcher
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub retried: u64,
    pub dropped: u64,
    pub restarts: u64,
}

impl DeliveryStats {
    /// Count the outcome of one relayed envelope
    pub fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::DeliveredAfterRetry => {
                self.delivered += 1;
                self.retried += 1;
            }
            DeliveryOutcome::Dropped => self.dropped += 1,
        }
    }
}

/// Mirrors one resource type from a change source to a relay.
pub struct ResourceWatcher<S, R> {
    resource_type: ResourceType,
    source: S,
    relay: R,
    lifetime: WatchLifetime,
    backoff: ExponentialBackoff,
    shutdown: CancellationToken,
    state: WatcherState,
    stats: DeliveryStats,
}

impl<S, R> ResourceWatcher<S, R>
where
    S: ChangeSource,
    S::Object: Resource + Serialize,
    R: Relay,
{
    /// Creates a new watcher in the STARTING state.
    pub fn new(
        resource_type: ResourceType,
        source: S,
        relay: R,
        lifetime: WatchLifetime,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            resource_type,
            source,
            relay,
            lifetime,
            backoff: ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60)),
            shutdown,
            state: WatcherState::Starting,
            stats: DeliveryStats::default(),
        }
    }

    /// Override the re-acquisition backoff
    #[cfg(test)]
    #[must_use]
    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run until shutdown. Returns the final delivery counters.
    pub async fn run(mut self) -> DeliveryStats {
        info!(resource = %self.resource_type, "Starting {} watcher", self.resource_type);
        let shutdown = self.shutdown.clone();
        let mut timer = self.lifetime.start();

        loop {
            self.transition(WatcherState::Starting);
            let opened = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                opened = self.source.open() => opened,
            };

            let stream = match opened {
                Ok(stream) => {
                    self.backoff.reset();
                    stream
                }
                Err(e) => {
                    let delay = self.backoff.next_backoff();
                    warn!(
                        resource = %self.resource_type,
                        error = %e,
                        "Failed to open {} watch, retrying in {:?}", self.resource_type, delay
                    );
                    if self.pause(delay).await {
                        continue;
                    }
                    break;
                }
            };

            timer.restart();
            self.transition(WatcherState::Streaming);
            match self.stream_changes(stream, &mut timer).await {
                StreamExit::Shutdown => break,
                StreamExit::Restart(reason) => {
                    self.transition(WatcherState::Restarting);
                    self.stats.restarts += 1;
                    info!(
                        resource = %self.resource_type,
                        delivered = self.stats.delivered,
                        retried = self.stats.retried,
                        dropped = self.stats.dropped,
                        "Restarting {} watcher: {}", self.resource_type, reason
                    );
                    if reason.is_failure() {
                        let delay = self.backoff.next_backoff();
                        if !self.pause(delay).await {
                            break;
                        }
                    }
                }
            }
        }

        self.transition(WatcherState::Stopping);
        info!(
            resource = %self.resource_type,
            delivered = self.stats.delivered,
            retried = self.stats.retried,
            dropped = self.stats.dropped,
            "{} watcher stopped", self.resource_type
        );
        self.stats
    }

    /// Consume one subscription until it must be abandoned. The stream
    /// handle is released when this returns.
    async fn stream_changes(
        &mut self,
        mut stream: ChangeStream<S::Object>,
        timer: &mut LifetimeTimer,
    ) -> StreamExit {
        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => return StreamExit::Shutdown,
                () = timer.expired() => {
                    return StreamExit::Restart(RestartReason::LifetimeExpired);
                }
                item = stream.next() => match item {
                    None => return StreamExit::Restart(RestartReason::StreamClosed),
                    Some(Err(WatchError::TypeMismatch(e))) => {
                        return StreamExit::Restart(RestartReason::TypeMismatch(e));
                    }
                    Some(Err(e)) => {
                        return StreamExit::Restart(RestartReason::StreamError(e.to_string()));
                    }
                    Some(Ok(change)) => {
                        let envelope = match build_envelope(self.resource_type, &change) {
                            Ok(envelope) => envelope,
                            Err(e) => {
                                let reason = RestartReason::TypeMismatch(e.to_string());
                                return StreamExit::Restart(reason);
                            }
                        };
                        let outcome = self.relay_envelope(&envelope).await;
                        self.stats.record(outcome);
                    }
                }
            }
        }
    }

    /// Deliver one envelope, retrying once on a fresh connection. When the
    /// reconnect itself fails the envelope is dropped without a second send.
    async fn relay_envelope(&mut self, envelope: &Envelope) -> DeliveryOutcome {
        let resource = self.resource_type;
        let name = envelope.object_name();

        match self.relay.deliver(envelope).await {
            Ok(()) => {
                debug!(
                    resource = %resource,
                    kind = %envelope.event_kind(),
                    namespace = envelope.namespace(),
                    "Relayed {} {}", resource, name
                );
                return DeliveryOutcome::Delivered;
            }
            Err(e) => {
                warn!(
                    resource = %resource,
                    kind = %envelope.event_kind(),
                    error = %e,
                    "Failed to relay {} {}, reconnecting", resource, name
                );
            }
        }

        if let Err(e) = self.relay.reconnect().await {
            error!(
                resource = %resource,
                kind = %envelope.event_kind(),
                namespace = envelope.namespace(),
                error = %e,
                "Dropping {} {}, relay reconnect failed", resource, name
            );
            return DeliveryOutcome::Dropped;
        }

        match self.relay.deliver(envelope).await {
            Ok(()) => {
                debug!(resource = %resource, "Relayed {} {} after reconnect", resource, name);
                DeliveryOutcome::DeliveredAfterRetry
            }
            Err(e) => {
                error!(
                    resource = %resource,
                    kind = %envelope.event_kind(),
                    namespace = envelope.namespace(),
                    error = %e,
                    "Dropping {} {} after retry failed", resource, name
                );
                DeliveryOutcome::Dropped
            }
        }
    }

    /// Sleep unless shut down first. Returns false on shutdown.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    fn transition(&mut self, next: WatcherState) {
        if self.state != next {
            debug!(resource = %self.resource_type, "Watcher {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}

#[cfg(test)]
#[path = "watcher_test.rs"]
mod watcher_test;
