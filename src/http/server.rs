//! Accept loop and per-connection handling.
//!
//! # Responsibilities
//! - Accept connections until shutdown is signalled
//! - Run one task per connection: parse, route, dispatch, reply, close
//! - Attach request IDs and a tracing span to every connection
//! - Record per-request metrics
//!
//! # Design Decisions
//! - One request per connection; every reply carries `Connection: close`
//! - Dispatch runs on its own task; the connection task only waits on its outcome
//! - Client I/O failures drop the connection without a reply

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::http::dispatch::{spawn_dispatch, DispatchContext};
use crate::http::request::{parse_request, RequestLimits};
use crate::http::response::{write_response, Response, SERVER_SOFTWARE};
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::resilience::timeouts;
use crate::routing::VhostRegistry;

/// Header carrying the per-request correlation ID.
pub const X_REQUEST_ID: &str = "X-Request-Id";

/// Read-only state shared by all connection tasks.
#[derive(Debug)]
struct ServerState {
    registry: VhostRegistry,
    limits: RequestLimits,
    dispatch: DispatchContext,
}

/// HTTP front end of the gateway.
#[derive(Debug)]
pub struct HttpServer {
    state: Arc<ServerState>,
    tracker: ConnectionTracker,
}

impl HttpServer {
    pub fn new(config: &GatewayConfig) -> Self {
        let registry = VhostRegistry::from_config(config);
        tracing::info!(
            vhosts = config.vhosts.len(),
            names = registry.name_count(),
            default_root = %config.default_vhost.root.display(),
            "Virtual hosts registered"
        );

        Self {
            state: Arc::new(ServerState {
                registry,
                limits: RequestLimits::from(&config.limits),
                dispatch: DispatchContext {
                    connect_timeout: timeouts::from_secs(config.timeouts.connect_secs),
                },
            }),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Tracker for waiting on in-flight connections after [`run`](Self::run) returns.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept connections until `shutdown` fires.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) -> Result<(), ListenerError> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, "HTTP server starting");
        }

        loop {
            let accepted = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signalled, no longer accepting");
                    break;
                }
                accepted = listener.accept() => accepted,
            };

            let (stream, peer, permit) = match accepted {
                Ok(conn) => conn,
                Err(ListenerError::Accept(err)) => {
                    tracing::warn!(error = %err, "Accept failed");
                    continue;
                }
                Err(err) => return Err(err),
            };

            let guard = self.tracker.track();
            let request_id = Uuid::new_v4().to_string();
            let span = tracing::info_span!(
                "connection",
                connection_id = %guard.id(),
                request_id = %request_id,
                peer_addr = %peer
            );
            let state = Arc::clone(&self.state);

            tokio::spawn(
                async move {
                    handle_connection(&state, stream, peer, &request_id).await;
                    drop(permit);
                    drop(guard);
                }
                .instrument(span),
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn handle_connection(state: &ServerState, stream: TcpStream, peer: SocketAddr, request_id: &str) {
    let start = Instant::now();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let req = match parse_request(&mut reader, &state.limits).await {
        Ok(req) => Arc::new(req),
        Err(err) => {
            match err.status_code() {
                Some(status) => {
                    tracing::warn!(error = %err, status, "Rejecting request");
                    let resp = finish(Response::error(status, &err.to_string()), request_id);
                    if let Err(err) = write_response(&mut write_half, &resp).await {
                        tracing::debug!(error = %err, "Failed to write rejection");
                    }
                    metrics::record_request("-", status, start);
                }
                None => tracing::debug!(peer_addr = %peer, error = %err, "Client connection dropped"),
            }
            return;
        }
    };

    let lookup = state.registry.lookup(&req.host);
    if lookup.is_fallback() {
        tracing::debug!(host = %req.host, "No virtual host matched, using default");
        metrics::record_vhost_fallback();
    }
    let vhost = lookup.into_host();
    if req.keep_alive {
        tracing::trace!("Client asked for keep-alive; closing after reply");
    }

    let outcome = spawn_dispatch(Arc::clone(&vhost), Arc::clone(&req), state.dispatch.clone())
        .outcome()
        .await;
    let resp = finish(outcome.into_response(), request_id);

    if let Err(err) = write_response(&mut write_half, &resp).await {
        tracing::debug!(error = %err, "Failed to write response");
        return;
    }
    let _ = write_half.shutdown().await;

    metrics::record_request(&req.method, resp.status, start);
    tracing::info!(
        method = %req.method,
        host = %req.host,
        path = %req.path,
        vhost = vhost.label(),
        status = resp.status,
        bytes = resp.body.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );
}

/// Headers every reply carries.
fn finish(mut resp: Response, request_id: &str) -> Response {
    resp.headers.retain(|(name, _)| {
        !["Connection", "Server", X_REQUEST_ID]
            .iter()
            .any(|own| name.eq_ignore_ascii_case(own))
    });
    resp.set_header("Connection", "close");
    resp.set_header("Server", SERVER_SOFTWARE);
    resp.set_header(X_REQUEST_ID, request_id);
    resp
}
