//! Unit tests for the resource watcher

use super::*;
use crate::source::{Change, KubeChangeSource};
use crate::test_utils::*;
use futures::stream;
use k8s_openapi::api::core::v1::Pod;
use kube::core::WatchEvent;
use relay_client::{EventKind, MockTransport, RelaySession, SessionConfig};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(10);

fn relay(transport: &MockTransport) -> RelaySession<MockTransport> {
    let config = SessionConfig::new("ws://backend/monitoring")
        .with_client_id("cluster-a")
        .with_backoff(Duration::ZERO, Duration::ZERO);
    RelaySession::new(Arc::new(transport.clone()), config)
}

fn spawn_watcher<S>(
    source: S,
    transport: &MockTransport,
    lifetime: WatchLifetime,
) -> (CancellationToken, JoinHandle<DeliveryStats>)
where
    S: ChangeSource<Object = Pod>,
{
    let shutdown = CancellationToken::new();
    let watcher = ResourceWatcher::new(
        ResourceType::Pods,
        source,
        relay(transport),
        lifetime,
        shutdown.clone(),
    );
    (shutdown, tokio::spawn(watcher.run()))
}

fn pod_envelope(kind: EventKind, name: &str) -> Envelope {
    build_envelope(ResourceType::Pods, &Change { kind, object: pod(name, "default") }).unwrap()
}

fn delivered_kinds(transport: &MockTransport) -> Vec<(EventKind, String)> {
    transport
        .delivered()
        .iter()
        .map(|e| (e.event_kind(), e.object_name().to_string()))
        .collect()
}

/// Change source fed through a channel, for tests that act between events
struct ChannelSource {
    receiver: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Change<Pod>>>>,
}

impl ChannelSource {
    fn new() -> (Self, mpsc::UnboundedSender<Change<Pod>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let source = Self {
            receiver: std::sync::Mutex::new(Some(receiver)),
        };
        (source, sender)
    }
}

#[async_trait::async_trait]
impl ChangeSource for ChannelSource {
    type Object = Pod;

    async fn open(&self) -> Result<ChangeStream<Pod>, WatchError> {
        let receiver = self.receiver.lock().unwrap().take();
        match receiver {
            Some(receiver) => Ok(stream::unfold(receiver, |mut receiver| async move {
                receiver.recv().await.map(|change| (Ok(change), receiver))
            })
            .boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_pod_lifecycle_is_relayed_in_order() {
    let transport = MockTransport::new();
    let added = labeled_pod("pod-a", "default", "1");
    let modified = labeled_pod("pod-a", "default", "2");
    let deleted = labeled_pod("pod-a", "default", "3");
    let source = ScriptedSource::new(vec![Script::Stream(
        vec![
            change(EventKind::Added, added.clone()),
            change(EventKind::Modified, modified.clone()),
            change(EventKind::Deleted, deleted.clone()),
        ],
        Ending::Hang,
    )]);

    let (shutdown, handle) = spawn_watcher(source, &transport, WatchLifetime::default());
    assert!(wait_until(WAIT, || transport.frames().len() == 3).await);
    shutdown.cancel();
    let stats = handle.await.unwrap();

    let delivered = transport.delivered();
    assert_eq!(delivered.len(), 3);
    let expected = [
        (EventKind::Added, added),
        (EventKind::Modified, modified),
        (EventKind::Deleted, deleted),
    ];
    for (envelope, (kind, object)) in delivered.iter().zip(expected) {
        assert_eq!(envelope.resource_type(), ResourceType::Pods);
        assert_eq!(envelope.event_kind(), kind);
        assert_eq!(envelope.namespace(), "default");
        assert_eq!(envelope.payload(), &serde_json::to_value(&object).unwrap());
    }
    assert_eq!(stats.delivered, 3);
    assert_eq!(stats.retried, 0);
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_single_delivery_failure_is_retried_once() {
    let transport = MockTransport::new();
    transport.fail_next_sends(1);
    let source = ScriptedSource::new(vec![Script::Stream(
        vec![change(EventKind::Added, pod("pod-a", "default"))],
        Ending::Hang,
    )]);

    let (shutdown, handle) = spawn_watcher(source, &transport, WatchLifetime::default());
    assert!(wait_until(WAIT, || transport.frames().len() == 1).await);
    // Give the watcher time to misbehave, e.g. deliver a duplicate
    tokio::time::sleep(Duration::from_secs(5)).await;
    shutdown.cancel();
    let stats = handle.await.unwrap();

    assert_eq!(delivered_kinds(&transport), vec![(EventKind::Added, "pod-a".to_string())]);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.dropped, 0);
    assert_eq!(transport.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_second_failure_drops_event_and_continues() {
    let transport = MockTransport::new();
    transport.fail_next_sends(2);
    let source = ScriptedSource::new(vec![Script::Stream(
        vec![
            change(EventKind::Added, pod("pod-a", "default")),
            change(EventKind::Added, pod("pod-b", "default")),
        ],
        Ending::Hang,
    )]);

    let (shutdown, handle) = spawn_watcher(source, &transport, WatchLifetime::default());
    assert!(wait_until(WAIT, || transport.frames().len() == 1).await);
    shutdown.cancel();
    let stats = handle.await.unwrap();

    assert_eq!(delivered_kinds(&transport), vec![(EventKind::Added, "pod-b".to_string())]);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.restarts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_severed_connection_reconnects_once_without_loss() {
    let transport = MockTransport::new();
    let (source, events) = ChannelSource::new();
    let (shutdown, handle) = spawn_watcher(source, &transport, WatchLifetime::default());

    events
        .send(Change { kind: EventKind::Added, object: pod("pod-a", "default") })
        .unwrap();
    assert!(wait_until(WAIT, || transport.frames().len() == 1).await);

    transport.sever();
    events
        .send(Change { kind: EventKind::Modified, object: pod("pod-a", "default") })
        .unwrap();
    events
        .send(Change { kind: EventKind::Deleted, object: pod("pod-a", "default") })
        .unwrap();
    assert!(wait_until(WAIT, || transport.frames().len() == 3).await);
    shutdown.cancel();
    let stats = handle.await.unwrap();

    assert_eq!(
        delivered_kinds(&transport),
        vec![
            (EventKind::Added, "pod-a".to_string()),
            (EventKind::Modified, "pod-a".to_string()),
            (EventKind::Deleted, "pod-a".to_string()),
        ]
    );
    // One reconnect: the initial lazy connect plus exactly one more
    assert_eq!(transport.connect_count(), 2);
    assert_eq!(transport.close_count(), 1);
    assert_eq!(stats.retried, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reconnect_drops_without_second_send() {
    let transport = MockTransport::new();
    let mut watcher = ResourceWatcher::new(
        ResourceType::Pods,
        ScriptedSource::<Pod>::new(vec![]),
        relay(&transport),
        WatchLifetime::default(),
        CancellationToken::new(),
    );
    let outcome = watcher.relay_envelope(&pod_envelope(EventKind::Added, "pod-a")).await;
    assert_eq!(outcome, DeliveryOutcome::Delivered);

    transport.sever();
    transport.fail_next_connects(10);
    let outcome = watcher.relay_envelope(&pod_envelope(EventKind::Modified, "pod-a")).await;

    assert_eq!(outcome, DeliveryOutcome::Dropped);
    // The initial connect plus the one failed reconnect, no redial from a resend
    assert_eq!(transport.connect_count(), 2);
    assert_eq!(transport.delivered().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_backend_counts_dropped_event() {
    let transport = MockTransport::new();
    let (source, events) = ChannelSource::new();
    let (shutdown, handle) = spawn_watcher(source, &transport, WatchLifetime::default());

    events
        .send(Change { kind: EventKind::Added, object: pod("pod-a", "default") })
        .unwrap();
    assert!(wait_until(WAIT, || transport.frames().len() == 1).await);

    transport.sever();
    transport.fail_next_connects(10);
    events
        .send(Change { kind: EventKind::Modified, object: pod("pod-a", "default") })
        .unwrap();
    assert!(wait_until(WAIT, || transport.connect_count() == 2).await);
    tokio::time::sleep(Duration::from_secs(5)).await;
    shutdown.cancel();
    let stats = handle.await.unwrap();

    assert_eq!(transport.connect_count(), 2);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.retried, 0);
    assert_eq!(stats.restarts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_server_timeout_does_not_restart_watcher() {
    let transport = MockTransport::new();
    let api = ScriptedWatchApi::new(vec![
        WatchScript::Events(
            vec![WatchEvent::Added(versioned_pod("pod-a", "default", "5"))],
            Ending::Close,
        ),
        WatchScript::Events(
            vec![WatchEvent::Modified(versioned_pod("pod-a", "default", "6"))],
            Ending::Hang,
        ),
    ]);
    let source = KubeChangeSource::new(api.clone());

    let (shutdown, handle) = spawn_watcher(source, &transport, WatchLifetime::default());
    assert!(wait_until(WAIT, || transport.frames().len() == 2).await);
    shutdown.cancel();
    let stats = handle.await.unwrap();

    assert_eq!(stats.restarts, 0);
    assert_eq!(stats.delivered, 2);
    assert_eq!(api.requested_versions(), vec!["0", "5"]);
    assert_eq!(
        delivered_kinds(&transport),
        vec![
            (EventKind::Added, "pod-a".to_string()),
            (EventKind::Modified, "pod-a".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_lifetime_ceiling_restarts_with_fresh_stream() {
    let transport = MockTransport::new();
    let source = ScriptedSource::new(vec![
        Script::Stream(vec![change(EventKind::Added, pod("pod-a", "default"))], Ending::Hang),
        Script::Stream(vec![change(EventKind::Modified, pod("pod-a", "default"))], Ending::Hang),
    ]);
    let opens = source.opens();
    let started = tokio::time::Instant::now();

    let (shutdown, handle) = spawn_watcher(source, &transport, WatchLifetime::default());
    assert!(wait_until(WAIT, || transport.frames().len() == 1).await);
    assert_eq!(opens.load(Ordering::SeqCst), 1);

    assert!(wait_until(Duration::from_secs(31 * 60), || transport.frames().len() == 2).await);
    shutdown.cancel();
    let stats = handle.await.unwrap();

    assert_eq!(opens.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() >= Duration::from_secs(30 * 60));
    assert_eq!(stats.restarts, 1);
    assert_eq!(
        delivered_kinds(&transport),
        vec![
            (EventKind::Added, "pod-a".to_string()),
            (EventKind::Modified, "pod-a".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stream_close_restarts_immediately() {
    let transport = MockTransport::new();
    let source = ScriptedSource::new(vec![
        Script::Stream(vec![change(EventKind::Added, pod("pod-a", "default"))], Ending::Close),
        Script::Stream(vec![change(EventKind::Added, pod("pod-b", "default"))], Ending::Hang),
    ]);
    let opens = source.opens();
    let started = tokio::time::Instant::now();

    let (shutdown, handle) = spawn_watcher(source, &transport, WatchLifetime::default());
    assert!(wait_until(WAIT, || transport.frames().len() == 2).await);
    let elapsed = started.elapsed();
    shutdown.cancel();
    let stats = handle.await.unwrap();

    assert_eq!(opens.load(Ordering::SeqCst), 2);
    assert!(elapsed < Duration::from_secs(30 * 60));
    assert_eq!(stats.restarts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_type_mismatch_abandons_stream() {
    let transport = MockTransport::new();
    let source = ScriptedSource::new(vec![
        Script::Stream(
            vec![
                change(EventKind::Added, pod("pod-a", "default")),
                Err(WatchError::TypeMismatch("expected Pod".to_string())),
                change(EventKind::Added, pod("pod-never", "default")),
            ],
            Ending::Hang,
        ),
        Script::Stream(vec![change(EventKind::Added, pod("pod-c", "default"))], Ending::Hang),
    ]);
    let opens = source.opens();

    let (shutdown, handle) = spawn_watcher(source, &transport, WatchLifetime::default());
    assert!(wait_until(WAIT, || transport.frames().len() == 2).await);
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(opens.load(Ordering::SeqCst), 2);
    assert_eq!(
        delivered_kinds(&transport),
        vec![
            (EventKind::Added, "pod-a".to_string()),
            (EventKind::Added, "pod-c".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stream_error_restarts_after_backoff() {
    let transport = MockTransport::new();
    let source = ScriptedSource::new(vec![
        Script::Stream(
            vec![
                change(EventKind::Added, pod("pod-a", "default")),
                Err(WatchError::Stream("too old resource version".to_string())),
            ],
            Ending::Hang,
        ),
        Script::Stream(vec![change(EventKind::Added, pod("pod-b", "default"))], Ending::Hang),
    ]);
    let opens = source.opens();
    let shutdown = CancellationToken::new();
    let watcher = ResourceWatcher::new(
        ResourceType::Pods,
        source,
        relay(&transport),
        WatchLifetime::default(),
        shutdown.clone(),
    )
    .with_backoff(ExponentialBackoff::new(Duration::from_secs(5), Duration::from_secs(5)));
    let started = tokio::time::Instant::now();

    let handle = tokio::spawn(watcher.run());
    assert!(wait_until(WAIT, || transport.frames().len() == 2).await);
    let elapsed = started.elapsed();
    shutdown.cancel();
    let stats = handle.await.unwrap();

    assert_eq!(opens.load(Ordering::SeqCst), 2);
    assert_eq!(stats.restarts, 1);
    assert!(elapsed >= Duration::from_secs(5));
    assert_eq!(
        delivered_kinds(&transport),
        vec![
            (EventKind::Added, "pod-a".to_string()),
            (EventKind::Added, "pod-b".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_acquisition_failures_are_retried_with_backoff() {
    let transport = MockTransport::new();
    let source = ScriptedSource::new(vec![
        Script::Fail(WatchError::Acquire("connection refused".to_string())),
        Script::Fail(WatchError::Acquire("connection refused".to_string())),
        Script::Stream(vec![change(EventKind::Added, pod("pod-a", "default"))], Ending::Hang),
    ]);
    let opens = source.opens();
    let started = tokio::time::Instant::now();

    let (shutdown, handle) = spawn_watcher(source, &transport, WatchLifetime::default());
    assert!(wait_until(WAIT, || transport.frames().len() == 1).await);
    let elapsed = started.elapsed();
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(opens.load(Ordering::SeqCst), 3);
    // 1s + 2s of backoff before the third attempt
    assert!(elapsed >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_idle_watcher() {
    let transport = MockTransport::new();
    let source = ScriptedSource::<Pod>::new(vec![]);

    let (shutdown, handle) = spawn_watcher(source, &transport, WatchLifetime::default());
    tokio::time::sleep(Duration::from_secs(1)).await;
    shutdown.cancel();
    let stats = handle.await.unwrap();

    assert_eq!(stats, DeliveryStats::default());
    assert_eq!(transport.connect_count(), 0);
}
