//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use fcgi_gateway::config::{FastcgiConfig, GatewayConfig, ListenerConfig, VhostConfig};
use fcgi_gateway::fastcgi::params::decode_pairs;
use fcgi_gateway::fastcgi::record::{encode_record, Frame, RecordReader, RecordType, MAX_WRITE};
use fcgi_gateway::fastcgi::{Params, Transport};
use fcgi_gateway::lifecycle::{serve, Shutdown};
use fcgi_gateway::net::Listener;

/// What the mock responder received for one request.
#[derive(Debug, Clone, Default)]
pub struct CapturedRequest {
    pub params: Params,
    pub stdin: Vec<u8>,
}

/// Start a FastCGI responder that answers every request with `reply(request)` as stdout.
///
/// Each captured request is also sent on the returned channel.
pub async fn start_mock_responder<F>(reply: F) -> (SocketAddr, mpsc::UnboundedReceiver<CapturedRequest>)
where
    F: Fn(&CapturedRequest) -> Vec<u8> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let reply = Arc::new(reply);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let reply = Arc::clone(&reply);
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(captured) = serve_one(socket, reply.as_ref()).await {
                    let _ = tx.send(captured);
                }
            });
        }
    });

    (addr, rx)
}

async fn serve_one<F>(mut socket: TcpStream, reply: &F) -> Option<CapturedRequest>
where
    F: Fn(&CapturedRequest) -> Vec<u8>,
{
    let mut reader = RecordReader::new();
    let mut raw_params = Vec::new();
    let mut stdin = Vec::new();

    loop {
        match reader.read(&mut socket).await.ok()? {
            Frame::Record { header, content } => match header.record_type {
                RecordType::Params => raw_params.extend_from_slice(content),
                RecordType::Stdin if content.is_empty() => break,
                RecordType::Stdin => stdin.extend_from_slice(content),
                _ => {}
            },
            Frame::End(_) => return None,
        }
    }

    let captured = CapturedRequest {
        params: decode_pairs(&raw_params).ok()?.into_iter().collect(),
        stdin,
    };

    let stdout = reply(&captured);
    let mut out = Vec::new();
    for chunk in stdout.chunks(MAX_WRITE) {
        encode_record(&mut out, RecordType::Stdout, 1, chunk).ok()?;
    }
    encode_record(&mut out, RecordType::Stdout, 1, &[]).ok()?;
    encode_record(&mut out, RecordType::EndRequest, 1, &[0; 8]).ok()?;
    socket.write_all(&out).await.ok()?;
    let _ = socket.shutdown().await;

    Some(captured)
}

/// An address nothing is listening on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A vhost rooted at `root`, proxying `.php` to `responder` when given.
pub fn vhost(names: &[&str], root: &Path, responder: Option<SocketAddr>) -> VhostConfig {
    VhostConfig {
        names: names.iter().map(|n| n.to_string()).collect(),
        root: root.to_path_buf(),
        index: vec!["index.php".into(), "index.html".into()],
        fastcgi: responder.map(|addr| FastcgiConfig {
            network: Transport::Tcp,
            address: addr.to_string(),
            extensions: vec!["php".into()],
        }),
    }
}

pub fn gateway_config(vhosts: Vec<VhostConfig>, default_vhost: VhostConfig) -> GatewayConfig {
    let mut config = GatewayConfig {
        listener: ListenerConfig {
            bind_address: "127.0.0.1:0".into(),
            max_connections: 64,
        },
        vhosts,
        default_vhost,
        ..GatewayConfig::default()
    };
    config.timeouts.connect_secs = 2;
    config.timeouts.shutdown_grace_secs = 1;
    config
}

/// Run the gateway on an ephemeral port.
pub async fn start_gateway(config: GatewayConfig) -> (SocketAddr, Shutdown) {
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let handle = shutdown.clone();

    tokio::spawn(async move {
        let _ = serve(&config, listener, &handle).await;
    });

    (addr, shutdown)
}

/// A reply as read off the wire.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Write `request` verbatim and read until the gateway closes the connection.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> RawResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();

    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has a header block");
    let head = String::from_utf8_lossy(&raw[..split]).into_owned();
    let body = raw[split + 4..].to_vec();

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap();
    let status = status_line.split(' ').nth(1).unwrap().parse().unwrap();
    let headers = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    RawResponse { status, headers, body }
}

/// `GET path` for `host`, with optional extra header lines.
pub async fn get(addr: SocketAddr, host: &str, path: &str, extra: &[&str]) -> RawResponse {
    let mut req = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\n");
    for line in extra {
        req.push_str(line);
        req.push_str("\r\n");
    }
    req.push_str("\r\n");
    send_raw(addr, req.as_bytes()).await
}
