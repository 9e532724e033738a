//! Request parsing.
//!
//! # Responsibilities
//! - Read the request line and header block from the client socket
//! - Extract routing-relevant information (host, port, path, query)
//! - Read a fixed-length body, verbatim
//!
//! # Design Decisions
//! - Header size limits enforced before the body is read
//! - Field names compared case-insensitively; raw lines kept for forwarding
//! - No chunked request bodies; only Content-Length is honoured

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use thiserror::Error;

use crate::config::LimitsConfig;

/// A parsed client request. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    /// Request-target as sent, including any query string.
    pub target: String,
    pub version: String,
    /// Header lines in arrival order, without line terminators.
    pub headers: Vec<String>,
    pub host: String,
    pub port: String,
    pub path: String,
    pub query: String,
    pub content_length: usize,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    /// Client accepts gzip content coding.
    pub gzip: bool,
    /// Some header line asked for keep-alive.
    pub keep_alive: bool,
}

impl Request {
    /// Header lines split into trimmed `(name, value)` pairs.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim(), value.trim()))
    }

    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.fields()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

/// Size limits applied while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    pub max_header_bytes: usize,
    pub max_body_size: usize,
}

impl From<&LimitsConfig> for RequestLimits {
    fn from(cfg: &LimitsConfig) -> Self {
        Self {
            max_header_bytes: cfg.max_header_bytes,
            max_body_size: cfg.max_body_size,
        }
    }
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self::from(&LimitsConfig::default())
    }
}

/// Errors raised while reading a request.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Peer closed the connection before sending anything.
    #[error("connection closed before a request arrived")]
    Closed,

    #[error("client I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed request line {0:?}")]
    MalformedRequestLine(String),

    #[error("request headers exceed {0} bytes")]
    HeadersTooLarge(usize),

    #[error("request body of {size} bytes exceeds limit of {limit}")]
    BodyTooLarge { size: usize, limit: usize },
}

impl RequestError {
    /// Status to answer with, or `None` when the connection should just be dropped.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RequestError::Closed | RequestError::Io(_) => None,
            RequestError::MalformedRequestLine(_) => Some(400),
            RequestError::HeadersTooLarge(_) => Some(431),
            RequestError::BodyTooLarge { .. } => Some(413),
        }
    }
}

/// Read a full request: header block, then `Content-Length` body bytes.
pub async fn parse_request<R>(reader: &mut R, limits: &RequestLimits) -> Result<Request, RequestError>
where
    R: AsyncBufRead + Unpin,
{
    let mut req = parse_head(reader, limits).await?;
    read_body(reader, &mut req, limits).await?;
    Ok(req)
}

/// Read the request line and headers up to the blank line.
pub async fn parse_head<R>(reader: &mut R, limits: &RequestLimits) -> Result<Request, RequestError>
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = limits.max_header_bytes;

    let request_line = loop {
        match read_line(reader, &mut budget, limits.max_header_bytes).await? {
            None => return Err(RequestError::Closed),
            Some(line) if line.is_empty() => continue,
            Some(line) => break line,
        }
    };

    let mut tokens = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (tokens.next(), tokens.next(), tokens.next())
    else {
        return Err(RequestError::MalformedRequestLine(request_line));
    };

    let mut req = Request {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        ..Request::default()
    };

    loop {
        let line = read_line(reader, &mut budget, limits.max_header_bytes)
            .await?
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::UnexpectedEof))?;
        if line.is_empty() {
            break;
        }
        apply_header(&mut req, &line);
        req.headers.push(line);
    }

    match req.target.split_once('?') {
        Some((path, query)) => {
            req.path = path.to_string();
            req.query = query.to_string();
        }
        None => req.path = req.target.clone(),
    }

    tracing::info!(
        method = %req.method,
        host = %req.host,
        port = %req.port,
        target = %req.target,
        "Request received"
    );
    Ok(req)
}

/// Read exactly `content_length` body bytes.
pub async fn read_body<R>(reader: &mut R, req: &mut Request, limits: &RequestLimits) -> Result<(), RequestError>
where
    R: AsyncBufRead + Unpin,
{
    if req.content_length == 0 {
        return Ok(());
    }
    if req.content_length > limits.max_body_size {
        return Err(RequestError::BodyTooLarge {
            size: req.content_length,
            limit: limits.max_body_size,
        });
    }
    let mut body = vec![0u8; req.content_length];
    reader.read_exact(&mut body).await?;
    req.body = body;
    Ok(())
}

fn apply_header(req: &mut Request, line: &str) {
    if line.to_ascii_lowercase().contains("keep-alive") {
        req.keep_alive = true;
    }
    let Some((name, value)) = line.split_once(':') else {
        return;
    };
    let name = name.trim();
    let value = value.trim();

    if name.eq_ignore_ascii_case("Host") {
        let (host, port) = split_host(value);
        req.host = host.to_string();
        req.port = port.to_string();
    } else if name.eq_ignore_ascii_case("Accept-Encoding") {
        if value.to_ascii_lowercase().contains("gzip") {
            req.gzip = true;
        }
    } else if name.eq_ignore_ascii_case("Content-Length") {
        req.content_length = value.parse().unwrap_or(0);
    } else if name.eq_ignore_ascii_case("Content-Type") {
        req.content_type = Some(value.to_string());
    }
}

/// Split a Host value into host and port. Bracketed IPv6 literals keep their colons.
fn split_host(value: &str) -> (&str, &str) {
    if value.starts_with('[') {
        if let Some(end) = value.find(']') {
            let port = value[end + 1..].strip_prefix(':').unwrap_or("");
            return (&value[..=end], port);
        }
    }
    value.split_once(':').unwrap_or((value, ""))
}

/// Read one line, charging its bytes against `budget`.
async fn read_line<R>(reader: &mut R, budget: &mut usize, limit: usize) -> Result<Option<String>, RequestError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = (&mut *reader)
        .take(*budget as u64)
        .read_until(b'\n', &mut line)
        .await?;
    if n == 0 {
        if *budget == 0 {
            return Err(RequestError::HeadersTooLarge(limit));
        }
        return Ok(None);
    }
    *budget -= n;
    if line.last() != Some(&b'\n') {
        if *budget == 0 {
            return Err(RequestError::HeadersTooLarge(limit));
        }
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    }

    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}
