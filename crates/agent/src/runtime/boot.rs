//! Boot — logging init, config load, Docker connection, manager start.

use std::sync::Arc;
use tracing::{info, error};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::attach::AttachManager;
use crate::conf::AgentConfig;
use crate::docker::client::DockerClient;

/// Initialise the tracing / logging subsystem.
///
/// Logs go to stderr; stdout carries the record stream.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logtap_agent=info,logtap=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load config, connect to Docker and start the attachment manager.
///
/// Returns `(Arc<AttachManager>, AgentConfig)` on success.
pub async fn boot() -> Result<(Arc<AttachManager>, AgentConfig), Box<dyn std::error::Error>> {
    info!("Starting logtap v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (file or env)
    let config = AgentConfig::load()?;
    config.validate()?;
    info!(
        "Fan-out: queue_capacity={}, overflow={:?}",
        config.fanout.queue_capacity, config.fanout.overflow
    );

    info!(
        "Connecting to Docker daemon at: {}",
        if config.docker_socket.is_empty() {
            "default socket"
        } else {
            &config.docker_socket
        }
    );

    let docker_client = DockerClient::new(&config.docker_socket).map_err(|e| {
        error!("Failed to connect to Docker: {}", e);
        e
    })?;

    let manager = AttachManager::connect(Arc::new(docker_client), config.fanout.to_policy())
        .await
        .map_err(|e| {
            error!("Failed to start attachment manager: {}", e);
            e
        })?;
    info!("Attached to {} containers", manager.attached().await.len());

    Ok((manager, config))
}
