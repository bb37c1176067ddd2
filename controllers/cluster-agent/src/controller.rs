//! Watcher supervisor.
//!
//! This module contains the `Supervisor` that starts one resource watcher per
//! monitored resource type, each as an independent task, and restarts a
//! watcher whose task panics or returns before shutdown.

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::source::KubeChangeSource;
use crate::timer::WatchLifetime;
use crate::watcher::{DeliveryStats, ResourceWatcher};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Event, Namespace, Node, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Api, Client, Resource};
use relay_client::{
    ExponentialBackoff, ResourceType, SessionConfig, SessionFactory, WebSocketTransport,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Run time after which a watcher incarnation counts as healthy
const HEALTHY_RUN: Duration = Duration::from_secs(60);

/// Restart a watcher task until shutdown.
///
/// `spawn_watcher` builds a fresh watcher future for each incarnation. A task
/// that panics, or returns while the agent is still running, is started again
/// from scratch after a bounded backoff. An incarnation that ran for at least
/// `HEALTHY_RUN` resets the backoff.
pub async fn supervise<F, Fut>(
    resource_type: ResourceType,
    shutdown: CancellationToken,
    mut spawn_watcher: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = DeliveryStats> + Send + 'static,
{
    let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
    let mut incarnation: u64 = 0;

    while !shutdown.is_cancelled() {
        incarnation += 1;
        let started = Instant::now();
        let task = tokio::spawn(spawn_watcher());

        match task.await {
            Ok(_) if shutdown.is_cancelled() => break,
            Ok(stats) => {
                warn!(
                    resource = %resource_type,
                    incarnation,
                    delivered = stats.delivered,
                    dropped = stats.dropped,
                    "{} watcher returned unexpectedly, restarting", resource_type
                );
            }
            Err(e) if e.is_panic() => {
                error!(
                    resource = %resource_type,
                    incarnation,
                    "{} watcher panicked, restarting", resource_type
                );
            }
            Err(e) => {
                warn!(
                    resource = %resource_type,
                    error = %e,
                    "{} watcher task cancelled", resource_type
                );
            }
        }

        if started.elapsed() >= HEALTHY_RUN {
            backoff.reset();
        }
        let delay = backoff.next_backoff();
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    info!(resource = %resource_type, "{} supervisor stopped", resource_type);
}

/// Everything a watcher needs besides its resource type
#[derive(Clone)]
struct WatchContext {
    client: Client,
    sessions: Arc<SessionFactory<WebSocketTransport>>,
    lifetime: WatchLifetime,
    shutdown: CancellationToken,
}

impl WatchContext {
    fn spawn_supervised<K>(&self, resource_type: ResourceType) -> JoinHandle<()>
    where
        K: Resource<DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug
            + Send
            + Sync
            + 'static,
    {
        let context = self.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(supervise(resource_type, shutdown, move || {
            let watcher = ResourceWatcher::new(
                resource_type,
                KubeChangeSource::new(Api::<K>::all(context.client.clone())),
                context.sessions.session(),
                context.lifetime,
                context.shutdown.clone(),
            );
            watcher.run()
        }))
    }
}

/// Starts and owns the per-resource watcher tasks.
pub struct Supervisor {
    tasks: Vec<(ResourceType, JoinHandle<()>)>,
}

impl Supervisor {
    /// Verify cluster connectivity and start one supervised watcher per
    /// monitored resource type.
    pub async fn start(
        client: Client,
        config: &AgentConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, AgentError> {
        info!("Validating Kubernetes API connectivity...");
        let version = client.apiserver_version().await.map_err(|e| {
            error!("Failed to reach the Kubernetes API: {}", e);
            error!("Please ensure the agent runs in-cluster or a kubeconfig is available");
            AgentError::Kube(e)
        })?;
        info!("Connected to Kubernetes {}", version.git_version);

        let session_config = SessionConfig::new(config.relay_endpoint())
            .with_client_id(config.client_id.clone());
        let transport = Arc::new(WebSocketTransport::new());
        let sessions = if config.shared_session {
            SessionFactory::shared(transport, session_config)
        } else {
            SessionFactory::dedicated(transport, session_config)
        };
        info!(
            endpoint = %config.relay_endpoint(),
            shared = sessions.is_shared(),
            "Relay sessions configured"
        );

        let context = WatchContext {
            client,
            sessions: Arc::new(sessions),
            lifetime: config.watch_lifetime(),
            shutdown,
        };

        let tasks = config
            .monitored_resources()
            .into_iter()
            .map(|resource_type| {
                let task = match resource_type {
                    ResourceType::Deployments => {
                        context.spawn_supervised::<Deployment>(resource_type)
                    }
                    ResourceType::Pods => context.spawn_supervised::<Pod>(resource_type),
                    ResourceType::Services => context.spawn_supervised::<Service>(resource_type),
                    ResourceType::Nodes => context.spawn_supervised::<Node>(resource_type),
                    ResourceType::Ingress => context.spawn_supervised::<Ingress>(resource_type),
                    ResourceType::Secrets => context.spawn_supervised::<Secret>(resource_type),
                    ResourceType::Namespaces => {
                        context.spawn_supervised::<Namespace>(resource_type)
                    }
                    ResourceType::Events => context.spawn_supervised::<Event>(resource_type),
                };
                (resource_type, task)
            })
            .collect::<Vec<_>>();

        info!("Started {} resource watchers", tasks.len());
        Ok(Self { tasks })
    }

    /// Wait for every supervised watcher to stop (after shutdown).
    pub async fn run(self) {
        for (resource_type, task) in self.tasks {
            if let Err(e) = task.await {
                error!(
                    resource = %resource_type,
                    error = %e,
                    "{} supervisor task failed", resource_type
                );
            }
        }
        info!("All resource watchers stopped");
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field(
                "resources",
                &self.tasks.iter().map(|(rt, _)| *rt).collect::<Vec<_>>(),
            )
            .finish()
    }
}
