//! Session sharing
//!
//! Watchers either own a dedicated session or hold a handle to one shared
//! session. A shared session serializes `deliver` and `reconnect` behind an
//! async mutex, so one watcher can never write to a connection another
//! watcher has already replaced. A pending connect backoff is waited out
//! before taking the lock, so other handles are not held up by the sleep.

use crate::error::RelayError;
use crate::models::Envelope;
use crate::session::{Relay, RelaySession, SessionConfig};
use crate::transport::Transport;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

/// Cloneable handle to one relay session used by several watchers.
pub struct SharedRelaySession<T: Transport> {
    inner: Arc<Mutex<RelaySession<T>>>,
}

impl<T: Transport> SharedRelaySession<T> {
    /// Wrap a session for shared use
    pub fn new(session: RelaySession<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Lock the session once no connect backoff is pending
    async fn ready(&self) -> MutexGuard<'_, RelaySession<T>> {
        loop {
            let session = self.inner.lock().await;
            match session.retry_at() {
                Some(retry_at) if retry_at > Instant::now() => {
                    drop(session);
                    tokio::time::sleep_until(retry_at).await;
                }
                _ => return session,
            }
        }
    }
}

impl<T: Transport> Clone for SharedRelaySession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> fmt::Debug for SharedRelaySession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRelaySession")
            .field("handles", &Arc::strong_count(&self.inner))
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<T: Transport> Relay for SharedRelaySession<T> {
    async fn deliver(&mut self, envelope: &Envelope) -> Result<(), RelayError> {
        self.ready().await.deliver(envelope).await
    }

    async fn reconnect(&mut self) -> Result<(), RelayError> {
        self.ready().await.reconnect().await
    }
}

/// Session owned by one watcher, either dedicated or shared.
#[derive(Debug)]
pub enum RelayHandle<T: Transport> {
    Dedicated(RelaySession<T>),
    Shared(SharedRelaySession<T>),
}

#[async_trait::async_trait]
impl<T: Transport> Relay for RelayHandle<T> {
    async fn deliver(&mut self, envelope: &Envelope) -> Result<(), RelayError> {
        match self {
            Self::Dedicated(session) => session.deliver(envelope).await,
            Self::Shared(session) => session.deliver(envelope).await,
        }
    }

    async fn reconnect(&mut self) -> Result<(), RelayError> {
        match self {
            Self::Dedicated(session) => session.reconnect().await,
            Self::Shared(session) => session.reconnect().await,
        }
    }
}

/// Hands out relay handles to watchers.
///
/// In dedicated mode every call creates a brand-new disconnected session;
/// in shared mode every call returns a handle to the same session.
pub struct SessionFactory<T: Transport> {
    transport: Arc<T>,
    config: SessionConfig,
    shared: Option<SharedRelaySession<T>>,
}

impl<T: Transport> SessionFactory<T> {
    /// Factory creating one session per watcher
    pub fn dedicated(transport: Arc<T>, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            shared: None,
        }
    }

    /// Factory handing out one session shared by all watchers
    pub fn shared(transport: Arc<T>, config: SessionConfig) -> Self {
        let session = RelaySession::new(Arc::clone(&transport), config.clone());
        Self {
            transport,
            config,
            shared: Some(SharedRelaySession::new(session)),
        }
    }

    /// Whether handles share one session
    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.shared.is_some()
    }

    /// Relay handle for a newly started watcher
    #[must_use]
    pub fn session(&self) -> RelayHandle<T> {
        match &self.shared {
            Some(shared) => RelayHandle::Shared(shared.clone()),
            None => RelayHandle::Dedicated(RelaySession::new(
                Arc::clone(&self.transport),
                self.config.clone(),
            )),
        }
    }
}

impl<T: Transport> fmt::Debug for SessionFactory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("config", &self.config)
            .field("shared", &self.is_shared())
            .finish_non_exhaustive()
    }
}
