//! FastCGI error definitions.

use thiserror::Error;

use crate::fastcgi::record::ProtocolStatus;

/// Errors raised while talking to a FastCGI responder.
#[derive(Debug, Error)]
pub enum FcgiError {
    /// Dialing the responder failed.
    #[error("connect to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Dialing the responder did not finish before the deadline.
    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    /// Read or write failure on an established connection.
    #[error("upstream I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record header carried a version other than 1.
    #[error("fcgi: invalid header version {0}")]
    InvalidVersion(u8),

    /// Record header carried a type byte outside the protocol's range.
    #[error("fcgi: unknown record type {0}")]
    UnknownRecordType(u8),

    /// Record content longer than a 16-bit length field can express.
    #[error("fcgi: record content of {0} bytes exceeds 65535")]
    ContentTooLarge(usize),

    /// Name-value stream ended inside a pair.
    #[error("fcgi: truncated name-value pair")]
    TruncatedPair,

    /// EndRequest reported that the responder did not run the request.
    #[error("fcgi: responder rejected request: {0:?}")]
    Rejected(ProtocolStatus),

    /// Reply's first line could not be split into protocol and status.
    #[error("malformed HTTP response {0:?}")]
    MalformedResponse(String),

    /// Status token was not a 3-digit non-negative integer.
    #[error("malformed HTTP status code {0:?}")]
    MalformedStatus(String),

    /// Protocol token was not `HTTP/<major>.<minor>`.
    #[error("malformed HTTP version {0:?}")]
    MalformedVersion(String),

    /// Header line without a `:` separator.
    #[error("malformed MIME header line {0:?}")]
    MalformedHeader(String),

    /// Chunked reply body could not be decoded.
    #[error("malformed chunked encoding: {0}")]
    MalformedChunk(String),

    /// Reply ended before the header block was complete.
    #[error("unexpected end of upstream reply")]
    UnexpectedEof,
}

impl FcgiError {
    /// True for dial, read and write failures.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FcgiError::Connect { .. } | FcgiError::ConnectTimeout(_) | FcgiError::Io(_)
        )
    }

    /// True when the responder's bytes violated the record framing or reply format.
    pub fn is_protocol(&self) -> bool {
        !self.is_transport()
    }

    /// HTTP status surfaced to the client for this failure.
    ///
    /// Transport and framing errors mean no usable reply bytes were consumed: 502.
    /// Reply-parse errors happen after stdout was consumed: 500.
    pub fn status_code(&self) -> u16 {
        match self {
            FcgiError::Connect { .. }
            | FcgiError::ConnectTimeout(_)
            | FcgiError::Io(_)
            | FcgiError::InvalidVersion(_)
            | FcgiError::UnknownRecordType(_)
            | FcgiError::ContentTooLarge(_)
            | FcgiError::TruncatedPair
            | FcgiError::Rejected(_) => 502,
            FcgiError::MalformedResponse(_)
            | FcgiError::MalformedStatus(_)
            | FcgiError::MalformedVersion(_)
            | FcgiError::MalformedHeader(_)
            | FcgiError::MalformedChunk(_)
            | FcgiError::UnexpectedEof => 500,
        }
    }
}
