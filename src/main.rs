//! fcgi-gateway
//!
//! An HTTP/1.1 gateway built with Tokio that serves static files per
//! virtual host and hands configured extensions to a FastCGI responder.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request           ┌──────────────────────────────────────────────────────┐
//!     ─────────────────────────┼─▶ net::Listener ─▶ http::server (connection task)    │
//!                              │                       │                              │
//!                              │                       ▼                              │
//!                              │               http::request (parse)                  │
//!                              │                       │                              │
//!                              │                       ▼                              │
//!                              │        routing::VhostRegistry (exact / default)      │
//!                              │                       │                              │
//!                              │                       ▼                              │
//!                              │          http::dispatch (own task)                   │
//!                              │            ├── static file + mime                    │
//!                              │            └── fastcgi::FcgiClient ──────────────────┼──▶ Responder
//!                              │                       │                              │
//!     Client Response          │                       ▼                              │
//!     ◀────────────────────────┼──────────── http::response (gzip, assemble)          │
//!                              └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use fcgi_gateway::config::{load_config, GatewayConfig};
use fcgi_gateway::lifecycle::{self, signals, Shutdown};
use fcgi_gateway::observability::logging;

#[derive(Parser, Debug)]
#[command(name = "fcgi-gateway", version, about = "Static file and FastCGI gateway")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config: GatewayConfig = match load_config(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("fcgi-gateway: {}: {err}", args.config.display());
            return ExitCode::FAILURE;
        }
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    if let Err(err) = logging::init(&config.observability) {
        eprintln!("fcgi-gateway: failed to initialise logging: {err}");
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "fcgi-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        vhosts = config.vhosts.len(),
        connect_timeout_secs = config.timeouts.connect_secs,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    match lifecycle::run(config, &shutdown).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "Gateway failed to start");
            ExitCode::FAILURE
        }
    }
}
