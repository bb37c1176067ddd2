//! Test utilities for unit testing watchers
//!
//! This module provides object builders, a scripted in-memory change
//! source and a scripted watch API so watcher behavior can be tested
//! without a cluster.

use crate::error::WatchError;
use crate::source::{Change, ChangeSource, ChangeStream, RawWatchStream, WatchApi};
use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use kube::core::WatchEvent;
use relay_client::EventKind;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Helper to create a test Pod
pub fn pod(name: &str, namespace: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Helper to create a test Pod carrying a label, to tell versions apart
pub fn labeled_pod(name: &str, namespace: &str, version: &str) -> Pod {
    let mut pod = pod(name, namespace);
    pod.metadata.labels = Some([("version".to_string(), version.to_string())].into());
    pod
}

/// Helper to create a test Pod at a given resource version
pub fn versioned_pod(name: &str, namespace: &str, resource_version: &str) -> Pod {
    let mut pod = pod(name, namespace);
    pod.metadata.resource_version = Some(resource_version.to_string());
    pod
}

/// Helper to create a test Node
pub fn node(name: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Helper to wrap an object in a change
pub fn change<K>(kind: EventKind, object: K) -> Result<Change<K>, WatchError> {
    Ok(Change { kind, object })
}

/// What a scripted stream does after its items are exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// End of stream
    Close,
    /// Never yields again
    Hang,
}

/// One scripted `open()` outcome
pub enum Script<K> {
    Fail(WatchError),
    Stream(Vec<Result<Change<K>, WatchError>>, Ending),
}

/// Change source replaying scripted streams, one per `open()`.
///
/// Once the script is exhausted every further `open()` returns a stream
/// that hangs, so a watcher idles until it is shut down.
pub struct ScriptedSource<K> {
    scripts: Mutex<VecDeque<Script<K>>>,
    opens: Arc<AtomicUsize>,
}

impl<K> ScriptedSource<K> {
    pub fn new(scripts: Vec<Script<K>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of `open()` calls, readable after the source moves into a watcher
    pub fn opens(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opens)
    }
}

#[async_trait::async_trait]
impl<K: Send + 'static> ChangeSource for ScriptedSource<K> {
    type Object = K;

    async fn open(&self) -> Result<ChangeStream<K>, WatchError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self.scripts.lock().unwrap().pop_front();
        match next {
            Some(Script::Fail(e)) => Err(e),
            Some(Script::Stream(items, Ending::Close)) => Ok(stream::iter(items).boxed()),
            Some(Script::Stream(items, Ending::Hang)) => {
                Ok(stream::iter(items).chain(stream::pending()).boxed())
            }
            None => Ok(stream::pending().boxed()),
        }
    }
}

/// Bookmark watch event at `resource_version`
pub fn bookmark<K: DeserializeOwned>(resource_version: &str) -> WatchEvent<K> {
    serde_json::from_value(serde_json::json!({
        "type": "BOOKMARK",
        "object": {
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "resourceVersion": resource_version }
        }
    }))
    .expect("valid bookmark event")
}

/// `410 Gone` error event, as sent when the watched version is too old
pub fn expired<K: DeserializeOwned>() -> WatchEvent<K> {
    serde_json::from_value(serde_json::json!({
        "type": "ERROR",
        "object": {
            "status": "Failure",
            "message": "too old resource version",
            "reason": "Expired",
            "code": 410
        }
    }))
    .expect("valid error event")
}

/// One scripted watch request
pub enum WatchScript<K> {
    /// The request itself fails
    Fail(String),
    /// The request yields these events, then ends as given
    Events(Vec<WatchEvent<K>>, Ending),
}

/// Watch API replaying scripted requests, one per `watch_from`.
///
/// Records the resource version of every request. Once the script is
/// exhausted every further request hangs.
pub struct ScriptedWatchApi<K> {
    scripts: Arc<Mutex<VecDeque<WatchScript<K>>>>,
    requested: Arc<Mutex<Vec<String>>>,
}

impl<K> Clone for ScriptedWatchApi<K> {
    fn clone(&self) -> Self {
        Self {
            scripts: Arc::clone(&self.scripts),
            requested: Arc::clone(&self.requested),
        }
    }
}

impl<K> ScriptedWatchApi<K> {
    pub fn new(scripts: Vec<WatchScript<K>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            requested: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Resource versions of all requests so far
    pub fn requested_versions(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl<K> WatchApi for ScriptedWatchApi<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    type Object = K;

    async fn watch_from(&self, resource_version: &str) -> Result<RawWatchStream<K>, kube::Error> {
        self.requested.lock().unwrap().push(resource_version.to_string());
        let next = self.scripts.lock().unwrap().pop_front();
        match next {
            Some(WatchScript::Fail(message)) => Err(kube::Error::Service(message.into())),
            Some(WatchScript::Events(events, ending)) => {
                let events = stream::iter(events.into_iter().map(Ok));
                match ending {
                    Ending::Close => Ok(events.boxed()),
                    Ending::Hang => Ok(events.chain(stream::pending()).boxed()),
                }
            }
            None => Ok(stream::pending().boxed()),
        }
    }
}

/// Poll `condition` every simulated second, up to `limit`.
pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let step = Duration::from_secs(1);
    let mut waited = Duration::ZERO;
    while waited < limit {
        if condition() {
            return true;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
    condition()
}
