//! Node usage rows.
//!
//! Joins node status (allocatable capacity, system info) with the usage the
//! metrics API (`metrics.k8s.io/v1beta1`) reports for the same node. Metrics
//! objects are matched to nodes by name; a node without metrics, or with an
//! unparseable or zero capacity, gets a row with the usage columns empty.

use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::DynamicObject;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

const MIB: f64 = 1024.0 * 1024.0;

/// One row of the node metrics table
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRow {
    pub name: String,
    pub architecture: String,
    pub container_runtime_version: String,
    pub kubelet_version: String,
    pub operating_system: String,
    pub pods: String,
    pub ip_address: Option<String>,
    pub host_name: Option<String>,
    pub total_cpu_cores: Option<String>,
    pub cpu_usage_cores: Option<String>,
    pub cpu_usage_percentage: Option<String>,
    pub total_memory: Option<String>,
    pub memory_usage: Option<String>,
    pub memory_usage_percentage: Option<String>,
}

/// Parse a Kubernetes quantity (`250m`, `4`, `16Gi`, `8048364Ki`) into base units
pub fn parse_quantity(quantity: &str) -> Result<f64, String> {
    let quantity = quantity.trim();
    // A negative scale divides, so sub-unit suffixes stay exact
    let (number, scale) = if let Some(number) = quantity.strip_suffix("Ki") {
        (number, 1024_f64)
    } else if let Some(number) = quantity.strip_suffix("Mi") {
        (number, 1024_f64.powi(2))
    } else if let Some(number) = quantity.strip_suffix("Gi") {
        (number, 1024_f64.powi(3))
    } else if let Some(number) = quantity.strip_suffix("Ti") {
        (number, 1024_f64.powi(4))
    } else if let Some(number) = quantity.strip_suffix("Pi") {
        (number, 1024_f64.powi(5))
    } else if let Some(number) = quantity.strip_suffix("Ei") {
        (number, 1024_f64.powi(6))
    } else if let Some(number) = quantity.strip_suffix('n') {
        (number, -1e9)
    } else if let Some(number) = quantity.strip_suffix('u') {
        (number, -1e6)
    } else if let Some(number) = quantity.strip_suffix('m') {
        (number, -1e3)
    } else if let Some(number) = quantity.strip_suffix('k') {
        (number, 1e3)
    } else if let Some(number) = quantity.strip_suffix('M') {
        (number, 1e6)
    } else if let Some(number) = quantity.strip_suffix('G') {
        (number, 1e9)
    } else if let Some(number) = quantity.strip_suffix('T') {
        (number, 1e12)
    } else if let Some(number) = quantity.strip_suffix('P') {
        (number, 1e15)
    } else if let Some(number) = quantity.strip_suffix('E') {
        (number, 1e18)
    } else {
        (quantity, 1.0)
    };

    number
        .parse::<f64>()
        .map(|value| if scale < 0.0 { value / -scale } else { value * scale })
        .map_err(|_| format!("invalid quantity: {quantity}"))
}

/// Usage reported for one node
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Usage {
    millicores: Option<i64>,
    mebibytes: Option<i64>,
}

fn millicores(quantity: &str) -> Option<i64> {
    parse_quantity(quantity).ok().map(|cores| (cores * 1000.0).round() as i64)
}

fn mebibytes(quantity: &str) -> Option<i64> {
    parse_quantity(quantity).ok().map(|bytes| (bytes / MIB).floor() as i64)
}

fn percentage(used: Option<i64>, total: Option<i64>) -> Option<String> {
    match (used, total) {
        (Some(used), Some(total)) if total > 0 => Some(format!("{}%", used * 100 / total)),
        _ => None,
    }
}

fn usage_of(metrics: &DynamicObject) -> Usage {
    let usage = &metrics.data["usage"];
    Usage {
        millicores: usage["cpu"].as_str().and_then(millicores),
        mebibytes: usage["memory"].as_str().and_then(mebibytes),
    }
}

fn allocatable<'a>(
    allocatable: Option<&'a BTreeMap<String, Quantity>>,
    name: &str,
) -> Option<&'a str> {
    allocatable
        .and_then(|resources| resources.get(name))
        .map(|quantity| quantity.0.as_str())
}

fn address(node: &Node, kind: &str) -> Option<String> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|address| address.type_ == kind)
        .map(|address| address.address.clone())
}

/// Build one row per node, joining node metrics by node name
pub fn node_rows(nodes: &[Node], metrics: &[DynamicObject]) -> Vec<NodeRow> {
    let usage_by_node: HashMap<&str, Usage> = metrics
        .iter()
        .filter_map(|object| Some((object.metadata.name.as_deref()?, usage_of(object))))
        .collect();

    nodes
        .iter()
        .map(|node| {
            let name = node.metadata.name.clone().unwrap_or_default();
            let status = node.status.as_ref();
            let info = status.and_then(|status| status.node_info.as_ref());
            let resources = status.and_then(|status| status.allocatable.as_ref());
            let usage = usage_by_node.get(name.as_str()).copied().unwrap_or_default();

            let total_millicores = allocatable(resources, "cpu").and_then(millicores);
            let total_mebibytes = allocatable(resources, "memory").and_then(mebibytes);

            NodeRow {
                architecture: info.map(|i| i.architecture.clone()).unwrap_or_default(),
                container_runtime_version: info
                    .map(|i| i.container_runtime_version.clone())
                    .unwrap_or_default(),
                kubelet_version: info.map(|i| i.kubelet_version.clone()).unwrap_or_default(),
                operating_system: info
                    .map(|i| format!("{} / {}", i.operating_system, i.os_image))
                    .unwrap_or_default(),
                pods: allocatable(resources, "pods").unwrap_or("0").to_string(),
                ip_address: address(node, "InternalIP"),
                host_name: address(node, "Hostname"),
                total_cpu_cores: total_millicores.map(|m| format!("{m}m")),
                cpu_usage_cores: usage.millicores.map(|m| format!("{m}m")),
                cpu_usage_percentage: percentage(usage.millicores, total_millicores),
                total_memory: total_mebibytes.map(|mi| format!("{mi}Mi")),
                memory_usage: usage.mebibytes.map(|mi| format!("{mi}Mi")),
                memory_usage_percentage: percentage(usage.mebibytes, total_mebibytes),
                name,
            }
        })
        .collect()
}
