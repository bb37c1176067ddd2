//! Agent configuration.
//!
//! Every option is a command-line flag with an environment variable fallback,
//! so the agent can be configured from a Deployment manifest alone.

use crate::error::AgentError;
use crate::timer::WatchLifetime;
use clap::{Parser, ValueEnum};
use relay_client::ResourceType;
use std::net::SocketAddr;
use std::time::Duration;

/// Scheme used to reach the monitoring backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RelayScheme {
    #[default]
    Ws,
    Wss,
}

impl RelayScheme {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ws => "ws",
            Self::Wss => "wss",
        }
    }
}

/// Cluster agent: mirrors Kubernetes resource changes to a monitoring backend
#[derive(Parser, Debug, Clone)]
#[command(name = "cluster-agent", version, about, long_about = None)]
pub struct AgentConfig {
    /// Monitoring backend host, optionally with a port
    #[arg(long, env = "SERVER_ADDRESS")]
    pub server_address: String,

    /// Path of the monitoring endpoint on the backend
    #[arg(long, env = "RELAY_PATH", default_value = "/monitoring")]
    pub relay_path: String,

    #[arg(long, env = "RELAY_SCHEME", value_enum, default_value_t = RelayScheme::Ws)]
    pub relay_scheme: RelayScheme,

    /// Agent identifier presented to the backend
    #[arg(long, env = "CLIENT_ID")]
    pub client_id: String,

    /// Listen address of the HTTP surface
    #[arg(long, env = "LISTEN_ADDRESS", default_value = "0.0.0.0:1323")]
    pub listen: SocketAddr,

    /// Maximum life of one watch subscription, in seconds
    #[arg(long, env = "WATCH_LIFETIME_SECS", default_value_t = 1800)]
    pub watch_lifetime_secs: u64,

    /// Share one relay session across all watchers
    #[arg(long, env = "RELAY_SHARED_SESSION")]
    pub shared_session: bool,

    /// Comma-separated resource types to monitor (default: all)
    #[arg(long, env = "MONITORED_RESOURCES", value_delimiter = ',')]
    pub resources: Vec<ResourceType>,

    /// Enable debug logging
    #[arg(long, env = "DEBUG")]
    pub debug: bool,
}

impl AgentConfig {
    /// Reject settings that parse but cannot work.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.server_address.trim().is_empty() {
            return Err(AgentError::InvalidConfig(
                "server address must not be empty".to_string(),
            ));
        }
        if self.server_address.contains("://") {
            return Err(AgentError::InvalidConfig(format!(
                "server address '{}' must not include a scheme, use --relay-scheme",
                self.server_address
            )));
        }
        if self.client_id.trim().is_empty() {
            return Err(AgentError::InvalidConfig("client id must not be empty".to_string()));
        }
        if self.watch_lifetime_secs == 0 {
            return Err(AgentError::InvalidConfig(
                "watch lifetime must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    /// Full URL of the monitoring endpoint, e.g. `ws://backend:8080/monitoring`
    #[must_use]
    pub fn relay_endpoint(&self) -> String {
        let host = self.server_address.trim_end_matches('/');
        let path = self.relay_path.trim_start_matches('/');
        format!("{}://{host}/{path}", self.relay_scheme.as_str())
    }

    #[must_use]
    pub fn watch_lifetime(&self) -> WatchLifetime {
        WatchLifetime::new(Duration::from_secs(self.watch_lifetime_secs))
    }

    /// Monitored resource types, deduplicated, in registry order
    #[must_use]
    pub fn monitored_resources(&self) -> Vec<ResourceType> {
        if self.resources.is_empty() {
            return ResourceType::ALL.to_vec();
        }
        ResourceType::ALL
            .into_iter()
            .filter(|resource_type| self.resources.contains(resource_type))
            .collect()
    }
}
