//! Monitored resource registry.
//!
//! Maps each `ResourceType` to its Kubernetes API resource and scope, and
//! names the metrics API resources served next to them.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Event, Namespace, Node, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::core::{ApiResource, GroupVersionKind};
use relay_client::ResourceType;

/// Kubernetes API resource (group, version, kind, plural) for a resource type
#[must_use]
pub fn api_resource(resource_type: ResourceType) -> ApiResource {
    match resource_type {
        ResourceType::Deployments => ApiResource::erase::<Deployment>(&()),
        ResourceType::Pods => ApiResource::erase::<Pod>(&()),
        ResourceType::Services => ApiResource::erase::<Service>(&()),
        ResourceType::Nodes => ApiResource::erase::<Node>(&()),
        ResourceType::Ingress => ApiResource::erase::<Ingress>(&()),
        ResourceType::Secrets => ApiResource::erase::<Secret>(&()),
        ResourceType::Namespaces => ApiResource::erase::<Namespace>(&()),
        ResourceType::Events => ApiResource::erase::<Event>(&()),
    }
}

const METRICS_GROUP: &str = "metrics.k8s.io";
const METRICS_VERSION: &str = "v1beta1";

/// `NodeMetrics` of the metrics API (cluster-scoped)
#[must_use]
pub fn node_metrics_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk(METRICS_GROUP, METRICS_VERSION, "NodeMetrics");
    ApiResource::from_gvk_with_plural(&gvk, "nodes")
}

/// `PodMetrics` of the metrics API (namespaced)
#[must_use]
pub fn pod_metrics_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk(METRICS_GROUP, METRICS_VERSION, "PodMetrics");
    ApiResource::from_gvk_with_plural(&gvk, "pods")
}

/// Cluster-scoped types carry an empty namespace in their envelopes
#[must_use]
pub fn is_cluster_scoped(resource_type: ResourceType) -> bool {
    matches!(resource_type, ResourceType::Nodes | ResourceType::Namespaces)
}

/// Resolve a URL path segment (`pods`, `ingresses`, ...) to a resource type
#[must_use]
pub fn from_path_segment(segment: &str) -> Option<ResourceType> {
    ResourceType::ALL
        .into_iter()
        .find(|resource_type| api_resource(*resource_type).plural == segment)
}
