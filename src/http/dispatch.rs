//! Per-request dispatch: static file or FastCGI responder.
//!
//! # Responsibilities
//! - Resolve the first existing candidate under the vhost root
//! - Serve static files with a guessed Content-Type
//! - Forward proxied extensions to the responder and translate its reply
//! - Report exactly one outcome per request over a single-use channel
//!
//! # Data Flow
//! ```text
//! spawn_dispatch(vhost, request)
//!     → candidates (index expansion, existence check)
//!     → static:  read file → mime lookup
//!     → proxied: params → dial → GET | POST form | POST raw → copy headers/body
//!     → optional gzip
//!     → result channel: Outcome::Success | Outcome::Failure
//!     → error channel:  task panicked before producing an outcome
//! ```

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::fastcgi::client::FORM_CONTENT_TYPE;
use crate::fastcgi::{FcgiClient, FcgiError, Params, UpstreamResponse};
use crate::http::request::Request;
use crate::http::response::{Response, SERVER_SOFTWARE};
use crate::observability::metrics;
use crate::routing::{first_existing, Resolved, Upstream, VirtualHost};

/// Remote address reported to the responder.
const REMOTE_ADDR: &str = "127.0.0.1";

/// Failures while satisfying one request.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no candidate found for {0}")]
    NotFound(String),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Upstream(#[from] FcgiError),

    #[error("invalid form body: {0}")]
    Form(String),

    #[error("failed to compress response: {0}")]
    Encode(#[source] std::io::Error),

    #[error("dispatch task panicked")]
    Panicked,

    /// Both channels closed without a value.
    #[error("dispatch task ended without an outcome")]
    Dropped,
}

impl DispatchError {
    pub fn status(&self) -> u16 {
        match self {
            DispatchError::NotFound(_) => 404,
            DispatchError::Upstream(err) => err.status_code(),
            DispatchError::Read { .. }
            | DispatchError::Form(_)
            | DispatchError::Encode(_)
            | DispatchError::Panicked
            | DispatchError::Dropped => 500,
        }
    }
}

/// What a dispatch task produced.
#[derive(Debug)]
pub enum Outcome {
    Success(Response),
    Failure(DispatchError),
}

impl Outcome {
    pub fn into_response(self) -> Response {
        match self {
            Outcome::Success(resp) => resp,
            Outcome::Failure(err) => Response::error(err.status(), &err.to_string()),
        }
    }
}

/// Per-request settings handed to the dispatch task.
#[derive(Debug, Clone, Default)]
pub struct DispatchContext {
    /// Deadline for dialing the responder; `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
}

/// Receiving side of a spawned dispatch.
#[derive(Debug)]
pub struct DispatchHandle {
    result: oneshot::Receiver<Outcome>,
    error: oneshot::Receiver<DispatchError>,
}

impl DispatchHandle {
    /// Wait on both channels and take whichever answers first.
    pub async fn outcome(self) -> Outcome {
        let DispatchHandle { result, error } = self;
        tokio::select! {
            Ok(outcome) = result => outcome,
            Ok(err) = error => Outcome::Failure(err),
            else => Outcome::Failure(DispatchError::Dropped),
        }
    }
}

/// Run [`dispatch`] on its own task.
pub fn spawn_dispatch(vhost: Arc<VirtualHost>, req: Arc<Request>, ctx: DispatchContext) -> DispatchHandle {
    let (result_tx, result_rx) = oneshot::channel();
    let (error_tx, error_rx) = oneshot::channel();

    tokio::spawn(async move {
        match AssertUnwindSafe(dispatch(&vhost, &req, &ctx)).catch_unwind().await {
            Ok(outcome) => {
                let _ = result_tx.send(outcome);
            }
            Err(_) => {
                tracing::error!(path = %req.path, "Dispatch task panicked");
                let _ = error_tx.send(DispatchError::Panicked);
            }
        }
    });

    DispatchHandle {
        result: result_rx,
        error: error_rx,
    }
}

/// Build the reply for `req` against `vhost`.
pub async fn dispatch(vhost: &VirtualHost, req: &Request, ctx: &DispatchContext) -> Outcome {
    match build_response(vhost, req, ctx).await {
        Ok(resp) => Outcome::Success(resp),
        Err(err) => {
            tracing::debug!(path = %req.path, error = %err, "Dispatch failed");
            Outcome::Failure(err)
        }
    }
}

async fn build_response(vhost: &VirtualHost, req: &Request, ctx: &DispatchContext) -> Result<Response, DispatchError> {
    let resolved = first_existing(&req.path, vhost)
        .await
        .ok_or_else(|| DispatchError::NotFound(req.path.clone()))?;

    let mut resp = match vhost.upstream_for(&resolved.name) {
        Some(upstream) => proxy(upstream, vhost, &resolved, req, ctx).await?,
        None => serve_static(&resolved).await?,
    };

    if req.gzip && !resp.body.is_empty() && resp.header("Content-Encoding").is_none() {
        resp.gzip_encode().map_err(DispatchError::Encode)?;
    }
    Ok(resp)
}

async fn serve_static(resolved: &Resolved) -> Result<Response, DispatchError> {
    let body = tokio::fs::read(&resolved.file)
        .await
        .map_err(|source| DispatchError::Read {
            path: resolved.file.clone(),
            source,
        })?;
    let mime = mime_guess::from_path(&resolved.file).first_or_octet_stream();
    tracing::debug!(file = %resolved.file.display(), bytes = body.len(), "Serving static file");
    Ok(Response::new(200).with_body(mime.to_string(), body))
}

/// How a POST body travels upstream.
enum PostBody {
    Form(Vec<(String, String)>),
    Raw(String),
}

async fn proxy(
    upstream: &Upstream,
    vhost: &VirtualHost,
    resolved: &Resolved,
    req: &Request,
    ctx: &DispatchContext,
) -> Result<Response, DispatchError> {
    let params = build_params(vhost, resolved, req);
    let post = if req.method.eq_ignore_ascii_case("POST") {
        Some(post_body(req)?)
    } else {
        None
    };

    let client = match FcgiClient::dial(upstream.transport, &upstream.address, ctx.connect_timeout).await {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!(address = %upstream.address, error = %err, "Responder unreachable");
            metrics::record_upstream("connect_error");
            return Err(err.into());
        }
    };

    let reply = match post {
        Some(PostBody::Form(form)) => client.post_form(params, &form).await,
        Some(PostBody::Raw(content_type)) => {
            client
                .post(params, &content_type, req.body.as_slice(), req.body.len())
                .await
        }
        None => client.get(params).await,
    };
    if let Err(err) = client.close().await {
        tracing::debug!(error = %err, "Closing responder connection failed");
    }

    let reply = match reply {
        Ok(reply) => {
            metrics::record_upstream("ok");
            reply
        }
        Err(err) => {
            metrics::record_upstream(if err.is_transport() { "transport_error" } else { "protocol_error" });
            tracing::warn!(address = %upstream.address, error = %err, "Responder exchange failed");
            return Err(err.into());
        }
    };
    Ok(translate(reply))
}

fn translate(reply: UpstreamResponse) -> Response {
    let mut resp = Response::new(reply.status_code);
    for (name, value) in &reply.headers {
        resp.set_header(name, value);
    }
    resp.body = reply.body;
    resp
}

fn post_body(req: &Request) -> Result<PostBody, DispatchError> {
    match req.content_type.as_deref() {
        Some(ct) if !is_form_type(ct) => Ok(PostBody::Raw(ct.to_string())),
        _ => {
            let text = std::str::from_utf8(&req.body).map_err(|e| DispatchError::Form(e.to_string()))?;
            let form = url::form_urlencoded::parse(text.as_bytes())
                .into_owned()
                .collect();
            Ok(PostBody::Form(form))
        }
    }
}

fn is_form_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE))
        .unwrap_or(false)
}

/// CGI-style parameters for the responder.
pub fn build_params(vhost: &VirtualHost, resolved: &Resolved, req: &Request) -> Params {
    let mut params = Params::new();
    let script_name = format!("/{}", resolved.name.trim_start_matches('/'));

    params.insert("SCRIPT_FILENAME".into(), resolved.file.display().to_string());
    params.insert("SCRIPT_NAME".into(), script_name);
    params.insert("REQUEST_URI".into(), req.target.clone());
    params.insert("REQUEST_METHOD".into(), req.method.clone());
    params.insert("QUERY_STRING".into(), req.query.clone());
    params.insert("DOCUMENT_ROOT".into(), vhost.root.display().to_string());
    params.insert("SERVER_SOFTWARE".into(), SERVER_SOFTWARE.into());
    params.insert("SERVER_PROTOCOL".into(), req.version.clone());
    params.insert("SERVER_NAME".into(), req.host.clone());
    params.insert("SERVER_PORT".into(), req.port.clone());
    params.insert("REMOTE_ADDR".into(), REMOTE_ADDR.into());
    params.insert("GATEWAY_INTERFACE".into(), "CGI/1.1".into());

    for (name, value) in req.fields() {
        if name.eq_ignore_ascii_case("Content-Type") || name.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        let key = format!("HTTP_{}", name.to_ascii_uppercase().replace('-', "_"));
        params
            .entry(key)
            .and_modify(|v| {
                v.push_str(", ");
                v.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fastcgi::Transport;
    use std::path::Path;

    fn vhost(root: &Path, upstream: Option<Upstream>) -> VirtualHost {
        VirtualHost {
            names: vec!["site.test".into()],
            root: root.to_path_buf(),
            index: vec!["index.php".into(), "index.html".into()],
            upstream,
        }
    }

    fn get(path: &str) -> Request {
        Request {
            method: "GET".into(),
            target: path.into(),
            version: "HTTP/1.1".into(),
            path: path.into(),
            ..Request::default()
        }
    }

    async fn dead_address() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    #[tokio::test]
    async fn serves_static_with_mime_type() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("style.css"), "body{}").unwrap();
        let v = vhost(dir.path(), None);

        let resp = dispatch(&v, &get("/style.css"), &DispatchContext::default())
            .await
            .into_response();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type, "text/css");
        assert_eq!(resp.body, b"body{}");
        assert!(!resp.gzip);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let v = vhost(dir.path(), None);
        let outcome = dispatch(&v, &get("/"), &DispatchContext::default()).await;
        assert!(matches!(outcome, Outcome::Failure(DispatchError::NotFound(_))));
        assert_eq!(outcome.into_response().status, 404);
    }

    #[tokio::test]
    async fn gzip_applied_when_accepted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<p>hello</p>").unwrap();
        let v = vhost(dir.path(), None);
        let mut req = get("/");
        req.gzip = true;

        let resp = dispatch(&v, &req, &DispatchContext::default()).await.into_response();
        assert_eq!(resp.status, 200);
        assert!(resp.gzip);
        assert_ne!(resp.body, b"<p>hello</p>");
    }

    #[tokio::test]
    async fn empty_body_is_not_gzipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty.txt"), "").unwrap();
        let v = vhost(dir.path(), None);
        let mut req = get("/empty.txt");
        req.gzip = true;

        let resp = dispatch(&v, &req, &DispatchContext::default()).await.into_response();
        assert_eq!(resp.status, 200);
        assert!(!resp.gzip);
        assert!(resp.body.is_empty());
        assert!(resp.header("Content-Encoding").is_none());
    }

    #[tokio::test]
    async fn unreachable_responder_is_bad_gateway() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.php"), "<?php").unwrap();
        let upstream = Upstream {
            transport: Transport::Tcp,
            address: dead_address().await,
            extensions: vec!["php".into()],
        };
        let v = vhost(dir.path(), Some(upstream));
        let ctx = DispatchContext {
            connect_timeout: Some(Duration::from_secs(2)),
        };

        let resp = spawn_dispatch(Arc::new(v), Arc::new(get("/")), ctx)
            .outcome()
            .await
            .into_response();
        assert_eq!(resp.status, 502);
    }

    #[tokio::test]
    async fn non_utf8_form_is_rejected_before_dialing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("form.php"), "<?php").unwrap();
        let upstream = Upstream {
            transport: Transport::Tcp,
            address: dead_address().await,
            extensions: vec!["php".into()],
        };
        let v = vhost(dir.path(), Some(upstream));
        let mut req = get("/form.php");
        req.method = "POST".into();
        req.body = vec![0xff, 0xfe];
        req.content_length = 2;

        let outcome = dispatch(&v, &req, &DispatchContext::default()).await;
        assert!(matches!(outcome, Outcome::Failure(DispatchError::Form(_))));
        assert_eq!(outcome.into_response().status, 500);
    }

    #[test]
    fn params_carry_cgi_variables() {
        let v = vhost(Path::new("/srv/site"), None);
        let resolved = Resolved {
            name: "index.php".into(),
            file: PathBuf::from("/srv/site/index.php"),
        };
        let mut req = get("/");
        req.target = "/?a=1".into();
        req.query = "a=1".into();
        req.host = "site.test".into();
        req.port = "8080".into();
        req.headers = vec![
            "Host: site.test:8080".into(),
            "User-Agent: curl".into(),
            "Content-Type: text/plain".into(),
        ];

        let params = build_params(&v, &resolved, &req);
        assert_eq!(params["SCRIPT_FILENAME"], "/srv/site/index.php");
        assert_eq!(params["SCRIPT_NAME"], "/index.php");
        assert_eq!(params["QUERY_STRING"], "a=1");
        assert_eq!(params["REMOTE_ADDR"], "127.0.0.1");
        assert_eq!(params["SERVER_PORT"], "8080");
        assert_eq!(params["HTTP_USER_AGENT"], "curl");
        assert_eq!(params["HTTP_HOST"], "site.test:8080");
        assert!(!params.contains_key("HTTP_CONTENT_TYPE"));
        assert!(params["SERVER_SOFTWARE"].starts_with("fcgi-gateway/"));
    }

    #[test]
    fn form_type_detection_ignores_parameters() {
        assert!(is_form_type("application/x-www-form-urlencoded; charset=UTF-8"));
        assert!(!is_form_type("application/json"));
    }

    #[tokio::test]
    async fn handle_reports_error_channel() {
        let (result_tx, result) = oneshot::channel::<Outcome>();
        let (error_tx, error) = oneshot::channel();
        error_tx.send(DispatchError::Panicked).unwrap();
        drop(result_tx);

        let outcome = DispatchHandle { result, error }.outcome().await;
        assert!(matches!(outcome, Outcome::Failure(DispatchError::Panicked)));
    }
}
