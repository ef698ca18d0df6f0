//! Minimal FastCGI responder client.
//!
//! Speaks just enough of the FastCGI protocol to ask an FPM pool for a
//! script: one request per connection, `BEGIN_REQUEST` + `PARAMS` + empty
//! `STDIN`, then `STDOUT`/`STDERR` records until `END_REQUEST`. The CGI
//! response is split into headers and body.
//!
//! Reference: <https://fastcgi-archives.github.io/FastCGI_Specification.html>

use crate::fpm::address::{Endpoint, Scheme};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tracing::debug;

pub const FCGI_VERSION_1: u8 = 1;
pub const FCGI_RESPONDER: u16 = 1;
pub const HEADER_LEN: usize = 8;

/// Largest content a single record can carry.
pub const MAX_RECORD_CONTENT: usize = 65535;

/// Upper bound for stdout collected from one request.
pub const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

const REQUEST_ID: u16 = 1;

/// Bytes of a failed response body kept in the error message.
const ERROR_BODY_EXCERPT: usize = 256;

/// FastCGI record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
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

impl RecordType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::BeginRequest),
            2 => Some(Self::AbortRequest),
            3 => Some(Self::EndRequest),
            4 => Some(Self::Params),
            5 => Some(Self::Stdin),
            6 => Some(Self::Stdout),
            7 => Some(Self::Stderr),
            8 => Some(Self::Data),
            9 => Some(Self::GetValues),
            10 => Some(Self::GetValuesResult),
            11 => Some(Self::UnknownType),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FastCgiError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("connecting to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("FastCGI I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unsupported FastCGI record version {0}")]
    Version(u8),

    #[error("FastCGI parameters too large ({0} bytes)")]
    ParamTooLarge(usize),

    #[error("request rejected by application (protocol status {0})")]
    Rejected(u8),

    #[error("connection closed before END_REQUEST")]
    UnexpectedEof,

    #[error("response exceeded {0} bytes")]
    TooLarge(usize),

    #[error("application returned status {status}: {body}")]
    Status { status: u16, body: String },
}

/// A FastCGI record header (8 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub record_type: u8,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl Header {
    pub fn new(record_type: RecordType, request_id: u16, content_length: usize) -> Self {
        let content_length = content_length as u16;
        Self {
            version: FCGI_VERSION_1,
            record_type: record_type as u8,
            request_id,
            content_length,
            // keep records 8-byte aligned
            padding_length: ((8 - (content_length % 8)) % 8) as u8,
        }
    }

    pub fn from_bytes(buf: &[u8; HEADER_LEN]) -> Self {
        Self {
            version: buf[0],
            record_type: buf[1],
            request_id: u16::from_be_bytes([buf[2], buf[3]]),
            content_length: u16::from_be_bytes([buf[4], buf[5]]),
            padding_length: buf[6],
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let id = self.request_id.to_be_bytes();
        let cl = self.content_length.to_be_bytes();
        [
            self.version,
            self.record_type,
            id[0],
            id[1],
            cl[0],
            cl[1],
            self.padding_length,
            0,
        ]
    }
}

/// A complete FastCGI record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub header: Header,
    pub content: Vec<u8>,
}

impl Record {
    pub fn new(record_type: RecordType, request_id: u16, content: Vec<u8>) -> Self {
        Self {
            header: Header::new(record_type, request_id, content.len()),
            content,
        }
    }

    pub fn record_type(&self) -> Option<RecordType> {
        RecordType::from_u8(self.header.record_type)
    }
}

/// Reads one record. Returns `Ok(None)` on a clean EOF before a header.
pub async fn read_record<R>(reader: &mut R) -> Result<Option<Record>, FastCgiError>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(FastCgiError::UnexpectedEof);
        }
        filled += n;
    }

    let header = Header::from_bytes(&header_buf);
    if header.version != FCGI_VERSION_1 {
        return Err(FastCgiError::Version(header.version));
    }

    let mut content = vec![0u8; header.content_length as usize];
    read_exact_or_eof(reader, &mut content).await?;

    if header.padding_length > 0 {
        let mut padding = vec![0u8; header.padding_length as usize];
        read_exact_or_eof(reader, &mut padding).await?;
    }

    Ok(Some(Record { header, content }))
}

async fn read_exact_or_eof<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FastCgiError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FastCgiError::UnexpectedEof),
        Err(e) => Err(e.into()),
    }
}

/// Writes one record including padding.
pub async fn write_record<W>(writer: &mut W, record: &Record) -> Result<(), FastCgiError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(
        HEADER_LEN + record.content.len() + record.header.padding_length as usize,
    );
    buf.extend_from_slice(&record.header.to_bytes());
    buf.extend_from_slice(&record.content);
    buf.resize(buf.len() + record.header.padding_length as usize, 0);
    writer.write_all(&buf).await?;
    Ok(())
}

/// Encodes a name-value pair for a `PARAMS` stream.
pub fn encode_param(buf: &mut Vec<u8>, name: &str, value: &str) -> Result<(), FastCgiError> {
    encode_length(buf, name.len())?;
    encode_length(buf, value.len())?;
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

fn encode_length(buf: &mut Vec<u8>, len: usize) -> Result<(), FastCgiError> {
    if len < 128 {
        buf.push(len as u8);
    } else if len <= 0x7fff_ffff {
        buf.extend_from_slice(&((len as u32) | 0x8000_0000).to_be_bytes());
    } else {
        return Err(FastCgiError::ParamTooLarge(len));
    }
    Ok(())
}

/// Decodes a `PARAMS` stream. Truncated trailing pairs are dropped.
pub fn decode_params(data: &[u8]) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        let Some((name_len, consumed)) = decode_length(data, pos) else {
            break;
        };
        pos += consumed;
        let Some((value_len, consumed)) = decode_length(data, pos) else {
            break;
        };
        pos += consumed;

        if pos + name_len + value_len > data.len() {
            break;
        }

        let name = String::from_utf8_lossy(&data[pos..pos + name_len]).into_owned();
        pos += name_len;
        let value = String::from_utf8_lossy(&data[pos..pos + value_len]).into_owned();
        pos += value_len;

        params.push((name, value));
    }

    params
}

fn decode_length(data: &[u8], pos: usize) -> Option<(usize, usize)> {
    let first = *data.get(pos)?;
    if first >> 7 == 0 {
        return Some((first as usize, 1));
    }
    let bytes = data.get(pos..pos + 4)?;
    let len = u32::from_be_bytes([bytes[0] & 0x7f, bytes[1], bytes[2], bytes[3]]);
    Some((len as usize, 4))
}

/// CGI response returned by the application.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub stderr: Vec<u8>,
    pub app_status: u32,
}

impl Response {
    /// Splits raw stdout into CGI headers and body.
    pub fn from_stdout(stdout: Vec<u8>, stderr: Vec<u8>, app_status: u32) -> Self {
        let (head, body) = split_head(&stdout);
        let mut status = 200;
        let mut headers = Vec::new();

        if let Some(head) = head {
            for line in String::from_utf8_lossy(head).lines() {
                let Some((name, value)) = line.split_once(':') else {
                    continue;
                };
                let name = name.trim().to_string();
                let value = value.trim().to_string();
                if name.eq_ignore_ascii_case("status") {
                    if let Some(code) = value
                        .split_whitespace()
                        .next()
                        .and_then(|c| c.parse::<u16>().ok())
                    {
                        status = code;
                    }
                }
                headers.push((name, value));
            }
        }

        Self {
            status,
            headers,
            body: body.to_vec(),
            stderr,
            app_status,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Fails on a non-2xx CGI status.
    pub fn ensure_success(self) -> Result<Self, FastCgiError> {
        if (200..300).contains(&self.status) {
            return Ok(self);
        }
        let excerpt = &self.body[..self.body.len().min(ERROR_BODY_EXCERPT)];
        Err(FastCgiError::Status {
            status: self.status,
            body: String::from_utf8_lossy(excerpt).trim().to_string(),
        })
    }
}

fn split_head(stdout: &[u8]) -> (Option<&[u8]>, &[u8]) {
    for sep in [&b"\r\n\r\n"[..], &b"\n\n"[..]] {
        if let Some(idx) = stdout.windows(sep.len()).position(|w| w == sep) {
            return (Some(&stdout[..idx]), &stdout[idx + sep.len()..]);
        }
    }
    (None, stdout)
}

/// Sends one responder request over `stream` and collects the response.
pub async fn exchange<S>(stream: &mut S, params: &[(&str, &str)]) -> Result<Response, FastCgiError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut begin = Vec::with_capacity(8);
    begin.extend_from_slice(&FCGI_RESPONDER.to_be_bytes());
    begin.extend_from_slice(&[0u8; 6]);
    write_record(stream, &Record::new(RecordType::BeginRequest, REQUEST_ID, begin)).await?;

    let mut encoded = Vec::new();
    for (name, value) in params {
        encode_param(&mut encoded, name, value)?;
    }
    for chunk in encoded.chunks(MAX_RECORD_CONTENT) {
        write_record(stream, &Record::new(RecordType::Params, REQUEST_ID, chunk.to_vec())).await?;
    }
    write_record(stream, &Record::new(RecordType::Params, REQUEST_ID, Vec::new())).await?;
    write_record(stream, &Record::new(RecordType::Stdin, REQUEST_ID, Vec::new())).await?;
    stream.flush().await?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    loop {
        let record = read_record(stream)
            .await?
            .ok_or(FastCgiError::UnexpectedEof)?;
        if record.header.request_id != REQUEST_ID {
            continue;
        }

        match record.record_type() {
            Some(RecordType::Stdout) => {
                if stdout.len() + record.content.len() > MAX_RESPONSE_BYTES {
                    return Err(FastCgiError::TooLarge(MAX_RESPONSE_BYTES));
                }
                stdout.extend_from_slice(&record.content);
            }
            Some(RecordType::Stderr) => {
                if stderr.len() < MAX_RESPONSE_BYTES {
                    stderr.extend_from_slice(&record.content);
                }
            }
            Some(RecordType::EndRequest) => {
                let c = &record.content;
                if c.len() < 5 {
                    return Err(FastCgiError::UnexpectedEof);
                }
                let app_status = u32::from_be_bytes([c[0], c[1], c[2], c[3]]);
                let protocol_status = c[4];
                if protocol_status != 0 {
                    return Err(FastCgiError::Rejected(protocol_status));
                }
                if !stderr.is_empty() {
                    debug!(
                        "FastCGI stderr: {}",
                        String::from_utf8_lossy(&stderr).trim()
                    );
                }
                return Ok(Response::from_stdout(stdout, stderr, app_status));
            }
            _ => {}
        }
    }
}

/// Reads one responder request from the application side and returns its
/// decoded parameters. Used by in-process stand-ins for FPM.
pub async fn read_request<S>(stream: &mut S) -> Result<Vec<(String, String)>, FastCgiError>
where
    S: AsyncRead + Unpin,
{
    let mut params = Vec::new();
    loop {
        let record = read_record(stream)
            .await?
            .ok_or(FastCgiError::UnexpectedEof)?;
        match record.record_type() {
            Some(RecordType::Params) => params.extend_from_slice(&record.content),
            Some(RecordType::Stdin) if record.content.is_empty() => break,
            _ => {}
        }
    }
    Ok(decode_params(&params))
}

/// Writes `stdout` and an END_REQUEST with the given protocol status.
pub async fn write_response<S>(stream: &mut S, stdout: &[u8], protocol_status: u8) -> Result<(), FastCgiError>
where
    S: AsyncWrite + Unpin,
{
    for chunk in stdout.chunks(MAX_RECORD_CONTENT) {
        write_record(stream, &Record::new(RecordType::Stdout, REQUEST_ID, chunk.to_vec())).await?;
    }
    write_record(stream, &Record::new(RecordType::Stdout, REQUEST_ID, Vec::new())).await?;
    let end = vec![0, 0, 0, 0, protocol_status, 0, 0, 0];
    write_record(stream, &Record::new(RecordType::EndRequest, REQUEST_ID, end)).await?;
    stream.flush().await?;
    Ok(())
}

/// An open connection to a FastCGI endpoint.
#[derive(Debug)]
pub enum Connection {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Connection {
    /// Dials `endpoint`, bounded by `timeout`.
    pub async fn dial(endpoint: &Endpoint, timeout: Duration) -> Result<Self, FastCgiError> {
        let address = endpoint.address.clone();
        let connect = async {
            match endpoint.scheme {
                Scheme::Unix => UnixStream::connect(&endpoint.address).await.map(Self::Unix),
                Scheme::Tcp => TcpStream::connect(&endpoint.address).await.map(Self::Tcp),
            }
        };

        match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(source)) => Err(FastCgiError::Connect { address, source }),
            Err(_) => Err(FastCgiError::ConnectTimeout { address, timeout }),
        }
    }

    /// Issues a GET-style responder request with `params` as CGI environment.
    pub async fn get(&mut self, params: &[(&str, &str)]) -> Result<Response, FastCgiError> {
        match self {
            Self::Unix(s) => exchange(s, params).await,
            Self::Tcp(s) => exchange(s, params).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn serve_once<S>(mut stream: S, stdout: &[u8], protocol_status: u8) -> Vec<(String, String)>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let params = read_request(&mut stream).await.unwrap();
        write_response(&mut stream, stdout, protocol_status).await.unwrap();
        params
    }

    #[test]
    fn test_header_padding_alignment() {
        let h = Header::new(RecordType::Params, 1, 13);
        assert_eq!(h.padding_length, 3);
        let h = Header::new(RecordType::Params, 1, 16);
        assert_eq!(h.padding_length, 0);
        assert_eq!(Header::from_bytes(&h.to_bytes()), h);
    }

    #[test]
    fn test_param_length_encoding() {
        let long = "x".repeat(300);
        let mut buf = Vec::new();
        encode_param(&mut buf, "SCRIPT_FILENAME", "/status").unwrap();
        encode_param(&mut buf, "LONG", &long).unwrap();
        // 4-byte length has the high bit set
        assert_eq!(buf[2 + 15 + 7 + 1] & 0x80, 0x80);

        let decoded = decode_params(&buf);
        assert_eq!(decoded[0], ("SCRIPT_FILENAME".into(), "/status".into()));
        assert_eq!(decoded[1].1.len(), 300);
    }

    #[test]
    fn test_response_split_and_status() {
        let resp = Response::from_stdout(
            b"Status: 404 Not Found\r\nContent-type: text/html\r\n\r\nFile not found.".to_vec(),
            Vec::new(),
            0,
        );
        assert_eq!(resp.status, 404);
        assert_eq!(resp.header("content-type"), Some("text/html"));
        assert_eq!(resp.body, b"File not found.");
        assert!(matches!(
            resp.ensure_success(),
            Err(FastCgiError::Status { status: 404, .. })
        ));

        let ok = Response::from_stdout(b"Content-Type: application/json\n\n{}".to_vec(), Vec::new(), 0);
        assert_eq!(ok.status, 200);
        assert_eq!(ok.body, b"{}");
    }

    #[test]
    fn test_error_body_excerpt_splits_multibyte_char() {
        let mut stdout = b"Status: 500 Internal Server Error\r\n\r\n".to_vec();
        stdout.extend_from_slice("a".repeat(255).as_bytes());
        stdout.extend_from_slice("é Fehler beim Ausführen".as_bytes());

        let resp = Response::from_stdout(stdout, Vec::new(), 0);
        match resp.ensure_success() {
            Err(FastCgiError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert!(body.starts_with(&"a".repeat(255)));
                assert!(body.ends_with('\u{FFFD}'));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exchange_round_trip() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let body = format!("Content-Type: application/json\r\n\r\n{{\"pool\":\"{}\"}}", "w".repeat(3000));
        let body_clone = body.clone();
        let server = tokio::spawn(async move { serve_once(server, body_clone.as_bytes(), 0).await });

        let resp = exchange(
            &mut client,
            &[("SCRIPT_NAME", "/status"), ("QUERY_STRING", "json&full")],
        )
        .await
        .unwrap();

        assert_eq!(resp.status, 200);
        assert!(resp.body.starts_with(b"{\"pool\":\"www"));
        assert_eq!(resp.body.len(), body.len() - "Content-Type: application/json\r\n\r\n".len());

        let params = server.await.unwrap();
        assert!(params.contains(&("QUERY_STRING".to_string(), "json&full".to_string())));
    }

    #[tokio::test]
    async fn test_exchange_rejected() {
        let (mut client, server) = tokio::io::duplex(4096);
        tokio::spawn(async move { serve_once(server, b"", 3).await });

        let err = exchange(&mut client, &[("SCRIPT_NAME", "/status")])
            .await
            .unwrap_err();
        assert!(matches!(err, FastCgiError::Rejected(3)));
    }

    #[tokio::test]
    async fn test_exchange_eof_before_end() {
        let (mut client, server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let mut server = server;
            let _ = read_record(&mut server).await;
            drop(server);
        });

        let err = exchange(&mut client, &[("SCRIPT_NAME", "/status")])
            .await
            .unwrap_err();
        assert!(matches!(err, FastCgiError::UnexpectedEof | FastCgiError::Io(_)));
    }

    #[tokio::test]
    async fn test_dial_missing_unix_socket() {
        let endpoint = Endpoint::unix("/non/existent/php-fpm.sock");
        let err = Connection::dial(&endpoint, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, FastCgiError::Connect { .. }));
    }
}
