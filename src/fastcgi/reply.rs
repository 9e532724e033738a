//! Parsing of the responder's stdout into an HTTP-like response.

use crate::fastcgi::error::FcgiError;

/// Structured form of a responder reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    /// Protocol token from the first line, e.g. `HTTP/1.1`.
    pub proto: String,
    pub proto_major: u8,
    pub proto_minor: u8,
    /// Status text after the protocol token, e.g. `200 OK`.
    pub status: String,
    pub status_code: u16,
    /// Header fields in arrival order.
    pub headers: Vec<(String, String)>,
    /// Body after transfer decoding.
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// True when the first `Transfer-Encoding` value is `chunked`.
    pub fn is_chunked(&self) -> bool {
        self.header("Transfer-Encoding")
            .and_then(|te| te.split(',').next())
            .map(|first| first.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }
}

/// Parse a complete reply byte stream.
pub fn parse_reply(raw: &[u8]) -> Result<UpstreamResponse, FcgiError> {
    let mut cursor = LineCursor::new(raw);

    let line = cursor.next_line().ok_or(FcgiError::UnexpectedEof)?;
    let (proto, status) = match line.find(' ') {
        Some(i) => (line[..i].to_string(), line[i + 1..].trim_start().to_string()),
        None => return Err(FcgiError::MalformedResponse(line)),
    };

    let code_token = status.split(' ').next().unwrap_or_default();
    if code_token.len() != 3 {
        return Err(FcgiError::MalformedStatus(code_token.to_string()));
    }
    let status_code: u16 = code_token
        .parse()
        .map_err(|_| FcgiError::MalformedStatus(code_token.to_string()))?;

    let (proto_major, proto_minor) =
        parse_http_version(&proto).ok_or_else(|| FcgiError::MalformedVersion(proto.clone()))?;

    let mut headers = Vec::new();
    loop {
        let line = cursor.next_line().ok_or(FcgiError::UnexpectedEof)?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FcgiError::MalformedHeader(line.clone()))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let mut response = UpstreamResponse {
        proto,
        proto_major,
        proto_minor,
        status,
        status_code,
        headers,
        body: Vec::new(),
    };
    let rest = cursor.rest();
    response.body = if response.is_chunked() {
        decode_chunked(rest)?
    } else {
        rest.to_vec()
    };
    Ok(response)
}

/// Parse `HTTP/<major>.<minor>` with single-digit components.
fn parse_http_version(proto: &str) -> Option<(u8, u8)> {
    match proto {
        "HTTP/1.1" => return Some((1, 1)),
        "HTTP/1.0" => return Some((1, 0)),
        _ => {}
    }
    let rest = proto.strip_prefix("HTTP/")?;
    let (major, minor) = rest.split_once('.')?;
    if major.len() != 1 || minor.len() != 1 {
        return None;
    }
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// Decode a chunked transfer-encoded body. Trailers are discarded.
pub fn decode_chunked(mut src: &[u8]) -> Result<Vec<u8>, FcgiError> {
    let mut out = Vec::new();
    loop {
        let eol = find_crlf(src)
            .ok_or_else(|| FcgiError::MalformedChunk("missing chunk size line".to_string()))?;
        let size_line = String::from_utf8_lossy(&src[..eol]);
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| FcgiError::MalformedChunk(format!("bad chunk size {size_hex:?}")))?;
        src = &src[eol + 2..];

        if size == 0 {
            return Ok(out);
        }
        let end = size
            .checked_add(2)
            .filter(|&end| end <= src.len())
            .ok_or_else(|| FcgiError::MalformedChunk("chunk shorter than declared".to_string()))?;
        out.extend_from_slice(&src[..size]);
        if &src[size..end] != b"\r\n" {
            return Err(FcgiError::MalformedChunk("missing CRLF after chunk data".to_string()));
        }
        src = &src[end..];
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Splits the head of a reply into lines (`\r\n` or bare `\n`).
struct LineCursor<'a> {
    buf: &'a [u8],
}

impl<'a> LineCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn next_line(&mut self) -> Option<String> {
        let nl = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line = &self.buf[..nl];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        self.buf = &self.buf[nl + 1..];
        Some(String::from_utf8_lossy(line).into_owned())
    }

    fn rest(&self) -> &'a [u8] {
        self.buf
    }
}
