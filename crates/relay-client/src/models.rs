//! Relay data models
//!
//! The envelope is the unit of relay: one observed change of one resource,
//! carried to the backend together with the channel tag.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical stream identifier carried with every delivery.
pub const MONITORING_CHANNEL: &str = "monitoring";

/// Change classification reported by the cluster change stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

impl EventKind {
    /// Wire name of the kind
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "ADDED",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource types mirrored to the monitoring backend.
///
/// The backend uses this for routing and display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Deployments,
    Pods,
    Services,
    Nodes,
    Ingress,
    Secrets,
    Namespaces,
    Events,
}

impl ResourceType {
    /// Every monitored resource type, in startup order
    pub const ALL: [ResourceType; 8] = [
        Self::Deployments,
        Self::Pods,
        Self::Services,
        Self::Nodes,
        Self::Ingress,
        Self::Secrets,
        Self::Namespaces,
        Self::Events,
    ];

    /// Wire name of the resource type
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployments => "Deployments",
            Self::Pods => "Pods",
            Self::Services => "Services",
            Self::Nodes => "Nodes",
            Self::Ingress => "Ingress",
            Self::Secrets => "Secrets",
            Self::Namespaces => "Namespaces",
            Self::Events => "Events",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    /// Accepts the wire name or the lowercase plural (`pods`, `ingresses`), case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        let found = match wanted.as_str() {
            "deployments" | "deployment" => Self::Deployments,
            "pods" | "pod" => Self::Pods,
            "services" | "service" => Self::Services,
            "nodes" | "node" => Self::Nodes,
            "ingress" | "ingresses" => Self::Ingress,
            "secrets" | "secret" => Self::Secrets,
            "namespaces" | "namespace" => Self::Namespaces,
            "events" | "event" => Self::Events,
            _ => return Err(format!("unknown resource type: {s}")),
        };
        Ok(found)
    }
}

/// A relayed change notification.
///
/// Immutable once constructed: retries re-send the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    namespace: String,
    event_kind: EventKind,
    resource_type: ResourceType,
    payload: serde_json::Value,
}

impl Envelope {
    /// Build an envelope. `namespace` is empty for cluster-scoped resources.
    pub fn new(
        namespace: impl Into<String>,
        event_kind: EventKind,
        resource_type: ResourceType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            event_kind,
            resource_type,
            payload,
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn event_kind(&self) -> EventKind {
        self.event_kind
    }

    #[must_use]
    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// Full resource object as observed at the moment of the change
    #[must_use]
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Name of the resource from `payload.metadata.name`, for logging
    #[must_use]
    pub fn object_name(&self) -> &str {
        self.payload
            .pointer("/metadata/name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("<unknown>")
    }
}

/// Frame written on the wire for one delivery.
#[derive(Debug, Serialize)]
pub struct DeliveryFrame<'a> {
    pub channel: &'a str,
    #[serde(flatten)]
    pub envelope: &'a Envelope,
}

/// Values presented to the backend when a connection is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Channel tag announced on the connection
    pub channel: String,
    /// Agent identifier, if configured
    pub client_id: Option<String>,
}
