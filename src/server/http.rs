//! Minimal HTTP/1.1 framing over a raw TCP stream.
//!
//! Only what the transport needs: read one request head into an
//! [`http::Request`], read a bounded body, and write simple responses.

use std::time::Duration;

use http::{header, HeaderName, HeaderValue, Method, Request, StatusCode};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest request head accepted.
pub const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_HEADERS: usize = 64;
/// Most body bytes swallowed after refusing an oversized request.
const MAX_DISCARD_BYTES: usize = 1024 * 1024;
const DISCARD_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("connection closed before a full request head")]
    Closed,

    #[error("request head exceeds {MAX_HEAD_BYTES} bytes")]
    HeadTooLarge,

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<http::Error> for HttpError {
    fn from(e: http::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

/// A parsed request head plus any body bytes read along with it.
#[derive(Debug)]
pub struct RequestHead {
    pub request: Request<()>,
    pub leftover: Vec<u8>,
}

impl RequestHead {
    #[must_use]
    pub fn content_length(&self) -> Option<usize> {
        self.request
            .headers()
            .get(header::CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    /// `true` for a WebSocket upgrade request.
    #[must_use]
    pub fn is_websocket_upgrade(&self) -> bool {
        let has_token = |name: HeaderName, token: &str| {
            self.request.headers().get_all(name).iter().any(|v| {
                v.to_str()
                    .map(|s| s.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
                    .unwrap_or(false)
            })
        };
        self.request.method() == Method::GET
            && has_token(header::CONNECTION, "upgrade")
            && has_token(header::UPGRADE, "websocket")
    }
}

/// Read and parse one request head.
pub async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> Result<RequestHead, HttpError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(HttpError::Closed);
        }
        let search_from = buf.len().saturating_sub(3);
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_head_end(&buf[search_from..]) {
            break search_from + pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(HttpError::HeadTooLarge);
        }
    };

    let leftover = buf.split_off(end + 4);
    buf.truncate(end);
    let request = parse_head(&buf)?;
    Ok(RequestHead { request, leftover })
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse `METHOD target HTTP/1.x` plus header lines.
pub fn parse_head(raw: &[u8]) -> Result<Request<()>, HttpError> {
    let text = std::str::from_utf8(raw).map_err(|_| HttpError::Malformed("non-UTF-8 head".into()))?;
    let mut lines = text.split("\r\n");

    let request_line = lines
        .next()
        .ok_or_else(|| HttpError::Malformed("empty head".into()))?;
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HttpError::Malformed(format!("bad request line: {request_line}")));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(HttpError::Malformed(format!("unsupported version: {version}")));
    }

    let method =
        Method::from_bytes(method.as_bytes()).map_err(|e| HttpError::Malformed(e.to_string()))?;
    let mut builder = Request::builder().method(method).uri(target);

    for (count, line) in lines.enumerate() {
        if count >= MAX_HEADERS {
            return Err(HttpError::Malformed("too many headers".into()));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::Malformed(format!("bad header line: {line}")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| HttpError::Malformed(e.to_string()))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| HttpError::Malformed(e.to_string()))?;
        builder = builder.header(name, value);
    }

    Ok(builder.body(())?)
}

/// Read the body announced by `Content-Length`, refusing more than `limit`.
pub async fn read_body<S: AsyncRead + Unpin>(
    stream: &mut S,
    head: RequestHead,
    limit: usize,
) -> Result<Vec<u8>, HttpError> {
    let length = head.content_length().unwrap_or(head.leftover.len());
    if length > limit {
        return Err(HttpError::BodyTooLarge { limit });
    }

    let mut body = head.leftover;
    body.truncate(length);
    if body.len() < length {
        let start = body.len();
        body.resize(length, 0);
        stream.read_exact(&mut body[start..]).await?;
    }
    Ok(body)
}

/// Read and drop up to `length` unread body bytes, so closing the socket
/// does not reset the connection before the client sees our response.
pub async fn discard_body<S: AsyncRead + Unpin>(stream: &mut S, length: usize) {
    let mut remaining = length.min(MAX_DISCARD_BYTES);
    let mut buf = [0u8; 8192];
    let _ = tokio::time::timeout(DISCARD_TIMEOUT, async {
        while remaining > 0 {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => remaining = remaining.saturating_sub(n),
            }
        }
    })
    .await;
}

/// Write a complete response with a body.
pub async fn write_response<S: AsyncWrite + Unpin>(
    stream: &mut S,
    status: StatusCode,
    content_type: &str,
    body: &[u8],
) -> std::io::Result<()> {
    let head = response_head(status, &[("Content-Type", content_type)], body.len() as u64);
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

/// Write a JSON response.
pub async fn write_json<S: AsyncWrite + Unpin>(
    stream: &mut S,
    status: StatusCode,
    value: &serde_json::Value,
) -> std::io::Result<()> {
    write_response(stream, status, "application/json", value.to_string().as_bytes()).await
}

/// Serialize a status line and headers, closing the connection afterwards.
#[must_use]
pub fn response_head(status: StatusCode, headers: &[(&str, &str)], content_length: u64) -> String {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    for (name, value) in headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str(&format!("Content-Length: {content_length}\r\nConnection: close\r\n\r\n"));
    head
}
