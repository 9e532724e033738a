//! Startup orchestration.
//!
//! # Responsibilities
//! - Start the metrics exporter when enabled
//! - Bind the listener and begin accepting traffic
//! - Drain connections once shutdown is signalled
//!
//! # Design Decisions
//! - Only a bind failure is fatal; a broken metrics endpoint is logged
//! - Listener starts last (traffic only when ready)
//! - Shutdown has a deadline: connections still open after the grace period are abandoned

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::config::GatewayConfig;
use crate::http::HttpServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::{Listener, ListenerError};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Start every subsystem and serve until `shutdown` fires.
pub async fn run(config: GatewayConfig, shutdown: &Shutdown) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        start_metrics(&config.observability.metrics_address);
    }

    let listener = Listener::bind(&config.listener).await?;
    serve(&config, listener, shutdown).await
}

/// Serve on an already bound listener, then drain.
pub async fn serve(config: &GatewayConfig, listener: Listener, shutdown: &Shutdown) -> Result<(), StartupError> {
    let server = HttpServer::new(config);
    let tracker = server.tracker();

    server.run(listener, shutdown.subscribe()).await?;

    let grace = Duration::from_secs(config.timeouts.shutdown_grace_secs);
    tracing::info!(active = tracker.active_count(), grace_secs = grace.as_secs(), "Draining connections");
    match tracker.drain(grace).await {
        0 => tracing::info!("All connections drained"),
        remaining => tracing::warn!(remaining, "Grace period elapsed with connections still open"),
    }
    Ok(())
}

fn start_metrics(address: &str) {
    let addr: SocketAddr = match address.parse() {
        Ok(addr) => addr,
        Err(err) => {
            tracing::error!(metrics_address = %address, error = %err, "Failed to parse metrics address");
            return;
        }
    };
    if let Err(err) = metrics::init_metrics(addr) {
        tracing::error!(metrics_address = %address, error = %err, "Failed to start metrics endpoint");
    }
}
