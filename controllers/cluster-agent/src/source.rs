//! Cluster change sources.
//!
//! A `ChangeSource` hands out a fresh change stream for one resource type.
//! Each call to `open` is a new watch starting from resource version `0`.
//!
//! The API server ends every watch request after its `timeoutSeconds`
//! window. One change stream outlives those windows: when the server closes
//! the request, the stream re-issues the watch from the last resource version
//! it saw. Only an `ERROR` event or a transport failure ends the stream.

use crate::error::WatchError;
use futures::stream::{self, BoxStream, StreamExt};
use kube::api::{Api, WatchParams};
use kube::core::WatchEvent;
use kube::Resource;
use relay_client::EventKind;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

/// One observed change of a typed object
#[derive(Debug, Clone, PartialEq)]
pub struct Change<K> {
    pub kind: EventKind,
    pub object: K,
}

/// Stream of decoded changes. Decode failures surface as `WatchError::TypeMismatch`.
pub type ChangeStream<K> = BoxStream<'static, Result<Change<K>, WatchError>>;

/// Raw watch events of one watch request
pub type RawWatchStream<K> = BoxStream<'static, Result<WatchEvent<K>, kube::Error>>;

/// Source of change streams for one resource type.
#[async_trait::async_trait]
pub trait ChangeSource: Send + Sync + 'static {
    /// Typed object carried by the stream
    type Object: Send + 'static;

    /// Acquire a new change stream across all namespaces.
    async fn open(&self) -> Result<ChangeStream<Self::Object>, WatchError>;
}

/// One watch request against the cluster API.
#[async_trait::async_trait]
pub trait WatchApi: Clone + Send + Sync + 'static {
    type Object: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static;

    /// Start a watch request at `resource_version`
    async fn watch_from(
        &self,
        resource_version: &str,
    ) -> Result<RawWatchStream<Self::Object>, kube::Error>;
}

#[async_trait::async_trait]
impl<K> WatchApi for Api<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    type Object = K;

    async fn watch_from(&self, resource_version: &str) -> Result<RawWatchStream<K>, kube::Error> {
        let events = self.watch(&WatchParams::default(), resource_version).await?;
        Ok(events.boxed())
    }
}

/// Change source backed by the Kubernetes watch API.
#[derive(Clone)]
pub struct KubeChangeSource<W> {
    api: W,
}

impl<W: WatchApi> KubeChangeSource<W> {
    pub fn new(api: W) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl<W: WatchApi> ChangeSource for KubeChangeSource<W> {
    type Object = W::Object;

    async fn open(&self) -> Result<ChangeStream<W::Object>, WatchError> {
        let events = self
            .api
            .watch_from("0")
            .await
            .map_err(|e| WatchError::Acquire(e.to_string()))?;

        let resumable = ResumableWatch {
            api: self.api.clone(),
            resource_version: "0".to_string(),
            events: Some(events),
            finished: false,
        };
        Ok(stream::unfold(resumable, |mut watch| async move {
            let item = watch.next_change().await?;
            Some((item, watch))
        })
        .boxed())
    }
}

/// Watch that spans several server-side watch requests
struct ResumableWatch<W: WatchApi> {
    api: W,
    resource_version: String,
    events: Option<RawWatchStream<W::Object>>,
    finished: bool,
}

impl<W: WatchApi> ResumableWatch<W> {
    async fn next_change(&mut self) -> Option<Result<Change<W::Object>, WatchError>> {
        loop {
            if self.finished {
                return None;
            }

            if self.events.is_none() {
                debug!(
                    resource_version = %self.resource_version,
                    "Watch request closed by server, resuming"
                );
                match self.api.watch_from(&self.resource_version).await {
                    Ok(events) => self.events = Some(events),
                    Err(e) => {
                        self.finished = true;
                        return Some(Err(WatchError::Stream(e.to_string())));
                    }
                }
            }

            let next = match self.events.as_mut() {
                Some(events) => events.next().await,
                None => continue,
            };
            match next {
                None => self.events = None,
                Some(event) => {
                    self.track_version(&event);
                    if let Some(item) = decode_event(event) {
                        self.finished = item.is_err();
                        return Some(item);
                    }
                }
            }
        }
    }

    fn track_version(&mut self, event: &Result<WatchEvent<W::Object>, kube::Error>) {
        let seen = match event {
            Ok(
                WatchEvent::Added(object)
                | WatchEvent::Modified(object)
                | WatchEvent::Deleted(object),
            ) => object.meta().resource_version.clone(),
            Ok(WatchEvent::Bookmark(bookmark)) => {
                Some(bookmark.metadata.resource_version.clone())
            }
            Ok(WatchEvent::Error(_)) | Err(_) => None,
        };
        if let Some(version) = seen.filter(|version| !version.is_empty()) {
            self.resource_version = version;
        }
    }
}

/// Translate one raw watch item into a change, or drop it (bookmarks)
pub fn decode_event<K>(
    event: Result<WatchEvent<K>, kube::Error>,
) -> Option<Result<Change<K>, WatchError>> {
    match event {
        Ok(WatchEvent::Added(object)) => Some(Ok(Change {
            kind: EventKind::Added,
            object,
        })),
        Ok(WatchEvent::Modified(object)) => Some(Ok(Change {
            kind: EventKind::Modified,
            object,
        })),
        Ok(WatchEvent::Deleted(object)) => Some(Ok(Change {
            kind: EventKind::Deleted,
            object,
        })),
        Ok(WatchEvent::Bookmark(_)) => None,
        Ok(WatchEvent::Error(status)) => Some(Err(WatchError::Stream(format!("{status:?}")))),
        Err(kube::Error::SerdeError(e)) => Some(Err(WatchError::TypeMismatch(e.to_string()))),
        Err(e) => Some(Err(WatchError::Stream(e.to_string()))),
    }
}
