//! Record framing.
//!
//! Every record is an 8-byte header followed by `content_length` bytes of
//! content and `padding_length` zero bytes, so the on-wire size is always a
//! multiple of 8.
//!
//! ```text
//! 0        1      2        4              6         7        8
//! +--------+------+--------+--------------+---------+--------+---------...
//! |version | type | req id | content len  | pad len |reserved| content + padding
//! +--------+------+--------+--------------+---------+--------+---------...
//! ```

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::fastcgi::error::FcgiError;

/// Protocol version written into and expected from every header.
pub const VERSION_1: u8 = 1;

/// Size of a record header in bytes.
pub const HEADER_LEN: usize = 8;

/// Usable content bytes per record when splitting a stream.
pub const MAX_WRITE: usize = 65500;

/// Request id reserved for management records (GetValues).
pub const NULL_REQUEST_ID: u16 = 0;

/// Record types defined by the protocol.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
    Data = 8,
    GetValues = 9,
    GetValuesResult = 10,
    UnknownType = 11,
}

impl TryFrom<u8> for RecordType {
    type Error = FcgiError;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        Ok(match val {
            1 => RecordType::BeginRequest,
            2 => RecordType::AbortRequest,
            3 => RecordType::EndRequest,
            4 => RecordType::Params,
            5 => RecordType::Stdin,
            6 => RecordType::Stdout,
            7 => RecordType::Stderr,
            8 => RecordType::Data,
            9 => RecordType::GetValues,
            10 => RecordType::GetValuesResult,
            11 => RecordType::UnknownType,
            other => return Err(FcgiError::UnknownRecordType(other)),
        })
    }
}

/// Application roles a BeginRequest can ask for. Only `Responder` is used.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Responder = 1,
    Authorizer = 2,
    Filter = 3,
}

/// BeginRequest flag asking the responder to keep the connection open.
pub const FLAG_KEEP_CONN: u8 = 1;

/// Protocol-level completion status carried by EndRequest.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStatus {
    RequestComplete = 0,
    CantMpxConn = 1,
    Overloaded = 2,
    UnknownRole = 3,
}

impl ProtocolStatus {
    /// Map a wire byte to a known status.
    pub fn from_wire(val: u8) -> Option<Self> {
        match val {
            0 => Some(ProtocolStatus::RequestComplete),
            1 => Some(ProtocolStatus::CantMpxConn),
            2 => Some(ProtocolStatus::Overloaded),
            3 => Some(ProtocolStatus::UnknownRole),
            _ => None,
        }
    }
}

/// Decoded EndRequest body.
///
/// ```text
/// 0                4          5          8
/// +----------------+----------+----------+
/// | app status     | protocol | reserved |
/// +----------------+----------+----------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRequest {
    pub app_status: u32,
    pub protocol_status: u8,
}

impl EndRequest {
    /// Length of the body on the wire, before padding.
    pub const LEN: usize = 8;

    /// Decode from record content. Short bodies read as zero-filled.
    pub fn decode(content: &[u8]) -> Self {
        let mut body = [0u8; Self::LEN];
        let n = content.len().min(Self::LEN);
        body[..n].copy_from_slice(&content[..n]);
        Self {
            app_status: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
            protocol_status: body[4],
        }
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let app = self.app_status.to_be_bytes();
        [app[0], app[1], app[2], app[3], self.protocol_status, 0, 0, 0]
    }

    /// Known protocol status, or `None` for a value outside the protocol's range.
    pub fn status(&self) -> Option<ProtocolStatus> {
        ProtocolStatus::from_wire(self.protocol_status)
    }
}

/// Fixed 8-byte record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub record_type: RecordType,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
    pub reserved: u8,
}

impl Header {
    /// Build a header for `content_length` bytes of content.
    pub fn new(
        record_type: RecordType,
        request_id: u16,
        content_length: usize,
    ) -> Result<Self, FcgiError> {
        let content_length =
            u16::try_from(content_length).map_err(|_| FcgiError::ContentTooLarge(content_length))?;
        Ok(Self {
            version: VERSION_1,
            record_type,
            request_id,
            content_length,
            padding_length: padding_for(content_length as usize),
            reserved: 0,
        })
    }

    /// Serialize into big-endian wire order.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let id = self.request_id.to_be_bytes();
        let len = self.content_length.to_be_bytes();
        [
            self.version,
            self.record_type as u8,
            id[0],
            id[1],
            len[0],
            len[1],
            self.padding_length,
            self.reserved,
        ]
    }

    /// Parse a header, rejecting anything but version 1.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self, FcgiError> {
        if buf[0] != VERSION_1 {
            return Err(FcgiError::InvalidVersion(buf[0]));
        }
        Ok(Self {
            version: buf[0],
            record_type: RecordType::try_from(buf[1])?,
            request_id: u16::from_be_bytes([buf[2], buf[3]]),
            content_length: u16::from_be_bytes([buf[4], buf[5]]),
            padding_length: buf[6],
            reserved: buf[7],
        })
    }

    /// Content plus padding, i.e. bytes following the header on the wire.
    pub fn body_len(&self) -> usize {
        self.content_length as usize + self.padding_length as usize
    }
}

/// Zero bytes needed to round `content_length` up to a multiple of 8.
pub fn padding_for(content_length: usize) -> u8 {
    ((8 - content_length % 8) % 8) as u8
}

/// Append one framed record (header, content, padding) to `out`.
pub fn encode_record(
    out: &mut Vec<u8>,
    record_type: RecordType,
    request_id: u16,
    content: &[u8],
) -> Result<(), FcgiError> {
    let header = Header::new(record_type, request_id, content.len())?;
    out.reserve(HEADER_LEN + header.body_len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(content);
    out.resize(out.len() + header.padding_length as usize, 0);
    Ok(())
}

/// One decoded record as seen by a reader.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Any record other than EndRequest; `content` excludes padding.
    Record { header: Header, content: &'a [u8] },
    /// EndRequest was observed: the reply stream is over.
    End(EndRequest),
}

/// Reads records one at a time into a buffer reused across reads.
#[derive(Debug, Default)]
pub struct RecordReader {
    buf: Vec<u8>,
}

impl RecordReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the next record from `r`.
    ///
    /// EndRequest maps to [`Frame::End`] carrying its decoded body.
    pub async fn read<'a, R>(&'a mut self, r: &mut R) -> Result<Frame<'a>, FcgiError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut raw = [0u8; HEADER_LEN];
        r.read_exact(&mut raw).await?;
        let header = Header::decode(&raw)?;

        let n = header.body_len();
        if self.buf.len() < n {
            self.buf.resize(n, 0);
        }
        r.read_exact(&mut self.buf[..n]).await?;
        let content = &self.buf[..header.content_length as usize];

        if header.record_type == RecordType::EndRequest {
            return Ok(Frame::End(EndRequest::decode(content)));
        }
        Ok(Frame::Record { header, content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_length_is_multiple_of_eight() {
        for len in [0usize, 1, 7, 8, 9, 15, 16, 255, 4096, 65499, 65500, 65535] {
            let mut out = Vec::new();
            encode_record(&mut out, RecordType::Stdin, 1, &vec![0xAB; len]).unwrap();
            assert_eq!(out.len() % 8, 0, "len {len}");
            let pad = padding_for(len);
            assert!(pad <= 7);
            assert_eq!(out.len(), HEADER_LEN + len + pad as usize);
        }
    }

    #[test]
    fn header_wire_layout() {
        let header = Header::new(RecordType::Params, 0x0102, 0x0304).unwrap();
        assert_eq!(header.encode(), [1, 4, 0x01, 0x02, 0x03, 0x04, 4, 0]);
    }

    #[test]
    fn oversized_content_is_rejected() {
        let err = Header::new(RecordType::Stdout, 1, 65536).unwrap_err();
        assert!(matches!(err, FcgiError::ContentTooLarge(65536)));
    }

    #[tokio::test]
    async fn reader_strips_padding() {
        let mut wire = Vec::new();
        encode_record(&mut wire, RecordType::Stdout, 1, b"hello").unwrap();
        let mut reader = RecordReader::new();
        let mut src = wire.as_slice();
        match reader.read(&mut src).await.unwrap() {
            Frame::Record { header, content } => {
                assert_eq!(header.record_type, RecordType::Stdout);
                assert_eq!(header.padding_length, 3);
                assert_eq!(content, b"hello");
            }
            Frame::End(_) => panic!("expected a content record"),
        }
        assert!(src.is_empty());
    }

    #[tokio::test]
    async fn wrong_version_fails() {
        let wire = [2u8, 6, 0, 1, 0, 0, 0, 0];
        let mut reader = RecordReader::new();
        let err = reader.read(&mut &wire[..]).await.unwrap_err();
        assert!(matches!(err, FcgiError::InvalidVersion(2)));
    }

    #[tokio::test]
    async fn end_request_signals_end_of_stream() {
        let wire = [1u8, 3, 0, 1, 0, 8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut reader = RecordReader::new();
        let end = EndRequest {
            app_status: 0,
            protocol_status: ProtocolStatus::RequestComplete as u8,
        };
        assert_eq!(reader.read(&mut &wire[..]).await.unwrap(), Frame::End(end));
    }

    #[tokio::test]
    async fn end_request_body_is_decoded() {
        let body = EndRequest {
            app_status: 0x0102_0304,
            protocol_status: ProtocolStatus::Overloaded as u8,
        };
        let mut wire = Vec::new();
        encode_record(&mut wire, RecordType::EndRequest, 1, &body.encode()).unwrap();
        encode_record(&mut wire, RecordType::Stdout, 1, b"after").unwrap();

        let mut reader = RecordReader::new();
        let mut src = wire.as_slice();
        match reader.read(&mut src).await.unwrap() {
            Frame::End(end) => {
                assert_eq!(end.app_status, 0x0102_0304);
                assert_eq!(end.status(), Some(ProtocolStatus::Overloaded));
            }
            other => panic!("expected EndRequest, got {other:?}"),
        }
        // The body was consumed, so the next header lines up.
        assert!(matches!(reader.read(&mut src).await.unwrap(), Frame::Record { .. }));
    }

    #[test]
    fn unknown_protocol_status_has_no_variant() {
        assert_eq!(EndRequest::decode(&[0, 0, 0, 0, 9, 0, 0, 0]).status(), None);
        assert_eq!(EndRequest::decode(&[0, 0, 0, 7]).app_status, 7);
    }
}
