//! Cluster Agent
//!
//! Watches the cluster's core resource types and relays every change, as an
//! envelope, to a remote monitoring backend over an outbound connection:
//! - Deployments, Pods, Services, Ingress, Secrets, Events (all namespaces)
//! - Nodes, Namespaces (cluster-scoped)
//!
//! Also serves a small HTTP surface for health checks, resource access and node
//! usage metrics.

mod api;
mod config;
mod controller;
mod envelope;
mod error;
mod metrics;
mod resources;
mod source;
#[cfg(test)]
mod test_utils;
mod timer;
mod watcher;

use crate::config::AgentConfig;
use crate::error::AgentError;
use clap::Parser;
use controller::Supervisor;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AgentError> {
    let config = AgentConfig::parse();

    let default_level = if config.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Configure rustls crypto provider (ring) before any TLS client is built
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Cluster Agent");
    config.validate()?;

    info!("Configuration:");
    info!("  Relay endpoint: {}", config.relay_endpoint());
    info!("  Client ID: {}", config.client_id);
    info!("  Shared session: {}", config.shared_session);
    info!("  Watch lifetime: {:?}", config.watch_lifetime().ceiling());
    info!("  HTTP listen address: {}", config.listen);

    let client = Client::try_default().await?;
    let shutdown = CancellationToken::new();

    let supervisor = Supervisor::start(client.clone(), &config, shutdown.clone()).await?;

    let server = {
        let shutdown = shutdown.clone();
        let listen = config.listen;
        tokio::spawn(async move {
            if let Err(e) = api::serve(client, listen, shutdown).await {
                error!("HTTP server failed: {}", e);
            }
        })
    };

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    shutdown.cancel();
                }
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
        });
    }

    supervisor.run().await;
    if let Err(e) = server.await {
        error!("HTTP server task failed: {}", e);
    }

    info!("Cluster Agent stopped");
    Ok(())
}
