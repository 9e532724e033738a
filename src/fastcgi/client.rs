//! FastCGI client for the responder role.
//!
//! # Responsibilities
//! - Own exactly one upstream connection for one request
//! - Frame BeginRequest, Params, and Stdin streams onto the connection
//! - Collect Stdout/Stderr until EndRequest and parse the reply
//!
//! # Design Decisions
//! - One request per connection: BeginRequest never sets keep-conn
//! - Record writes go through a mutex so records never interleave
//! - Write and read buffers live with the connection and are reused

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::fastcgi::error::FcgiError;
use crate::fastcgi::params::{encode_pair, pack_params, Params, decode_pairs};
use crate::fastcgi::record::{
    encode_record, Frame, ProtocolStatus, RecordReader, RecordType, Role, FLAG_KEEP_CONN,
    MAX_WRITE, NULL_REQUEST_ID,
};
use crate::fastcgi::reply::{parse_reply, UpstreamResponse};
use crate::fastcgi::transport::{Transport, UpstreamStream};
use crate::resilience::timeouts::with_deadline;

/// Content type used for form posts and untyped POST bodies.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Connection state guarded by the client's lock.
#[derive(Debug)]
struct Connection<S> {
    stream: S,
    wbuf: Vec<u8>,
    reader: RecordReader,
}

/// A client bound to a single responder connection.
#[derive(Debug)]
pub struct FcgiClient<S = UpstreamStream> {
    conn: Mutex<Connection<S>>,
    request_id: u16,
    keep_conn: bool,
}

impl FcgiClient<UpstreamStream> {
    /// Dial the responder with no deadline.
    pub async fn connect(transport: Transport, address: &str) -> Result<Self, FcgiError> {
        Self::dial(transport, address, None).await
    }

    /// Dial the responder, failing with [`FcgiError::ConnectTimeout`] after `timeout`.
    pub async fn connect_timeout(
        transport: Transport,
        address: &str,
        timeout: Duration,
    ) -> Result<Self, FcgiError> {
        Self::dial(transport, address, Some(timeout)).await
    }

    /// Dial with an optional deadline.
    pub async fn dial(
        transport: Transport,
        address: &str,
        timeout: Option<Duration>,
    ) -> Result<Self, FcgiError> {
        let stream = with_deadline(timeout, UpstreamStream::connect(transport, address))
            .await
            .map_err(|_| FcgiError::ConnectTimeout(address.to_string()))?
            .map_err(|source| FcgiError::Connect {
                address: address.to_string(),
                source,
            })?;

        tracing::debug!(%transport, address, "Upstream connection established");
        Ok(Self::new(stream))
    }
}

impl<S> FcgiClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            conn: Mutex::new(Connection {
                stream,
                wbuf: Vec::with_capacity(MAX_WRITE + 16),
                reader: RecordReader::new(),
            }),
            request_id: 1,
            keep_conn: false,
        }
    }

    /// Shut down the write side and release the connection.
    pub async fn close(self) -> Result<(), FcgiError> {
        let mut conn = self.conn.into_inner();
        conn.stream.shutdown().await?;
        Ok(())
    }

    async fn write_record_as(
        &self,
        request_id: u16,
        record_type: RecordType,
        content: &[u8],
    ) -> Result<(), FcgiError> {
        let mut guard = self.conn.lock().await;
        let conn = &mut *guard;
        conn.wbuf.clear();
        encode_record(&mut conn.wbuf, record_type, request_id, content)?;
        conn.stream.write_all(&conn.wbuf).await?;
        Ok(())
    }

    async fn write_record(&self, record_type: RecordType, content: &[u8]) -> Result<(), FcgiError> {
        self.write_record_as(self.request_id, record_type, content).await
    }

    async fn write_begin_request(&self, role: Role) -> Result<(), FcgiError> {
        let role = role as u16;
        let flags = if self.keep_conn { FLAG_KEEP_CONN } else { 0 };
        let body = [(role >> 8) as u8, role as u8, flags, 0, 0, 0, 0, 0];
        self.write_record(RecordType::BeginRequest, &body).await
    }

    async fn write_pairs(&self, record_type: RecordType, params: &Params) -> Result<(), FcgiError> {
        for chunk in pack_params(params) {
            self.write_record(record_type, &chunk).await?;
        }
        self.write_record(record_type, &[]).await
    }

    async fn write_stream<R>(&self, record_type: RecordType, mut body: R) -> Result<(), FcgiError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; MAX_WRITE];
        loop {
            let mut filled = 0;
            while filled < MAX_WRITE {
                let n = body.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
            self.write_record(record_type, &buf[..filled]).await?;
            if filled < MAX_WRITE {
                break;
            }
        }
        self.write_record(record_type, &[]).await
    }

    /// Perform the request exchange and return the reply stream.
    ///
    /// Writes BeginRequest (responder role), the params stream, and the
    /// body as Stdin records, each stream closed by an empty record.
    pub async fn send_request<R>(
        &self,
        params: &Params,
        body: Option<R>,
    ) -> Result<ReplyStream<'_, S>, FcgiError>
    where
        R: AsyncRead + Unpin,
    {
        self.write_begin_request(Role::Responder).await?;
        self.write_pairs(RecordType::Params, params).await?;
        match body {
            Some(body) => self.write_stream(RecordType::Stdin, body).await?,
            None => self.write_record(RecordType::Stdin, &[]).await?,
        }
        Ok(ReplyStream {
            client: self,
            done: false,
        })
    }

    /// Send a request and parse the reply as an HTTP-like message.
    pub async fn request<R>(
        &self,
        params: &Params,
        body: Option<R>,
    ) -> Result<UpstreamResponse, FcgiError>
    where
        R: AsyncRead + Unpin,
    {
        let raw = self.send_request(params, body).await?.read_to_end().await?;
        parse_reply(&raw)
    }

    /// Issue a GET: no body, `CONTENT_LENGTH` of zero.
    pub async fn get(&self, mut params: Params) -> Result<UpstreamResponse, FcgiError> {
        params.insert("REQUEST_METHOD".into(), "GET".into());
        params.insert("CONTENT_LENGTH".into(), "0".into());
        self.request(&params, None::<&[u8]>).await
    }

    /// Issue a POST with `len` body bytes of type `body_type`.
    pub async fn post<R>(
        &self,
        mut params: Params,
        body_type: &str,
        body: R,
        len: usize,
    ) -> Result<UpstreamResponse, FcgiError>
    where
        R: AsyncRead + Unpin,
    {
        let method_unset = params
            .get("REQUEST_METHOD")
            .map(|m| m.is_empty() || m == "GET")
            .unwrap_or(true);
        if method_unset {
            params.insert("REQUEST_METHOD".into(), "POST".into());
        }
        params.insert("CONTENT_LENGTH".into(), len.to_string());
        let body_type = if body_type.is_empty() { FORM_CONTENT_TYPE } else { body_type };
        params.insert("CONTENT_TYPE".into(), body_type.to_string());

        self.request(&params, Some(body)).await
    }

    /// POST form fields, url-encoded.
    pub async fn post_form(
        &self,
        params: Params,
        form: &[(String, String)],
    ) -> Result<UpstreamResponse, FcgiError> {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form)
            .finish();
        let body = encoded.as_bytes();
        self.post(params, FORM_CONTENT_TYPE, body, body.len()).await
    }

    /// Query responder variables such as `MAX_CONNS` or `MPXS_CONNS`.
    pub async fn get_values(&self, names: &[&str]) -> Result<Vec<(String, String)>, FcgiError> {
        let mut query = Vec::new();
        for name in names {
            encode_pair(&mut query, name.as_bytes(), b"");
        }
        self.write_record_as(NULL_REQUEST_ID, RecordType::GetValues, &query)
            .await?;

        let mut guard = self.conn.lock().await;
        let Connection { stream, reader, .. } = &mut *guard;
        loop {
            match reader.read(stream).await? {
                Frame::Record { header, content } => {
                    if header.record_type == RecordType::GetValuesResult {
                        return decode_pairs(content);
                    }
                    tracing::debug!(record_type = ?header.record_type, "Skipping record while awaiting values");
                }
                Frame::End(_) => return Ok(Vec::new()),
            }
        }
    }
}

/// Reply byte stream: Stdout and Stderr content in arrival order, ending at EndRequest.
///
/// An EndRequest whose protocol status is not `RequestComplete` fails with
/// [`FcgiError::Rejected`].
#[derive(Debug)]
pub struct ReplyStream<'a, S> {
    client: &'a FcgiClient<S>,
    done: bool,
}

impl<S> ReplyStream<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Append the next non-empty chunk to `out`. Returns 0 once EndRequest was seen.
    pub async fn read_chunk(&mut self, out: &mut Vec<u8>) -> Result<usize, FcgiError> {
        if self.done {
            return Ok(0);
        }
        let mut guard = self.client.conn.lock().await;
        let Connection { stream, reader, .. } = &mut *guard;
        loop {
            match reader.read(stream).await? {
                Frame::End(end) => {
                    self.done = true;
                    match end.status() {
                        Some(ProtocolStatus::RequestComplete) => {}
                        Some(status) => return Err(FcgiError::Rejected(status)),
                        None => tracing::warn!(
                            protocol_status = end.protocol_status,
                            "Unknown protocol status in EndRequest"
                        ),
                    }
                    if end.app_status != 0 {
                        tracing::debug!(app_status = end.app_status, "Responder exited with non-zero status");
                    }
                    return Ok(0);
                }
                Frame::Record { header, content } => match header.record_type {
                    RecordType::Stdout | RecordType::Stderr if !content.is_empty() => {
                        if header.record_type == RecordType::Stderr {
                            tracing::warn!(
                                stderr = %String::from_utf8_lossy(content).trim_end(),
                                "Upstream wrote to stderr"
                            );
                        }
                        out.extend_from_slice(content);
                        return Ok(content.len());
                    }
                    RecordType::Stdout | RecordType::Stderr => continue,
                    other => {
                        tracing::debug!(record_type = ?other, "Ignoring unexpected record in reply");
                    }
                },
            }
        }
    }

    /// Drain the stream until EndRequest.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>, FcgiError> {
        let mut out = Vec::new();
        while self.read_chunk(&mut out).await? > 0 {}
        Ok(out)
    }
}
