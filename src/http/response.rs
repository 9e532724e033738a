//! Response building and wire assembly.
//!
//! # Responsibilities
//! - Hold status, headers, and body for one reply
//! - Gzip-compress bodies on request
//! - Render the status line, headers, and body into wire bytes
//!
//! # Design Decisions
//! - Content-Length is always computed from the final body, never copied
//! - Transfer-Encoding from upstream is dropped; bodies are already decoded
//! - Every reply closes the connection

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::status;

/// Content type of generated pages.
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Value of the `Server` header.
pub const SERVER_SOFTWARE: &str = concat!("fcgi-gateway/", env!("CARGO_PKG_VERSION"));

/// A response ready for assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: String,
    /// Extra headers in insertion order; repeated names are allowed.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Body has been gzip-compressed.
    pub gzip: bool,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            content_type: HTML_CONTENT_TYPE.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            gzip: false,
        }
    }

    pub fn with_body(mut self, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        self.content_type = content_type.into();
        self.body = body;
        self
    }

    /// Synthetic error page for `status`.
    pub fn error(status: u16, message: &str) -> Self {
        let reason = status::reason(status).unwrap_or("Error");
        let page = format!(
            "<h1>{}</h1><h4>Code {}</h4><p>{}</p>",
            reason,
            status,
            escape_html(message)
        );
        Self::new(status).with_body(HTML_CONTENT_TYPE, page.into_bytes())
    }

    /// Add a header. `Content-Type` replaces the content type; framing headers are dropped.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if name.eq_ignore_ascii_case("Content-Type") {
            self.content_type = value.to_string();
        } else if name.eq_ignore_ascii_case("Content-Length")
            || name.eq_ignore_ascii_case("Transfer-Encoding")
        {
            tracing::trace!(header = name, "Dropping framing header");
        } else {
            self.headers.push((name.to_string(), value.to_string()));
        }
    }

    /// First value of extra header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Compress the body with gzip and mark the response as encoded.
    pub fn gzip_encode(&mut self) -> std::io::Result<()> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(self.body.len() / 2), Compression::default());
        encoder.write_all(&self.body)?;
        self.body = encoder.finish()?;
        self.gzip = true;
        Ok(())
    }

    /// Render status line, headers, blank line, and body.
    pub fn render(&self) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n",
            self.status,
            status::reason(self.status).unwrap_or(""),
            self.content_type,
            self.body.len()
        );
        if self.gzip {
            head.push_str("Content-Encoding: gzip\r\n");
        }
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

/// Write the rendered response in one operation.
pub async fn write_response<W>(w: &mut W, resp: &Response) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(&resp.render()).await?;
    w.flush().await
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
