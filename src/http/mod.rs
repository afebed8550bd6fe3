//! Minimal HTTP/1.0 wire handling.
//!
//! The server speaks a deliberately tiny subset of HTTP: it reads one
//! request per connection, looks only at the request line (method and
//! path), writes a fixed-format response, and shuts the socket down.
//! No keep-alive, no chunked encoding, no request bodies.
//!
//! Responses are always
//! `HTTP/1.0 <code> <reason>\r\nContent-Length: <n>\r\n\r\n<body>`.

pub mod router;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on the bytes read while looking for the end of the request
/// head. Anything larger is rejected as malformed.
const MAX_REQUEST_HEAD: usize = 8 * 1024;

/// Errors from parsing an inbound request.
///
/// All of these mean the connection is abandoned without a response.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request line could not be parsed.
    #[error("malformed request line")]
    Malformed,

    /// The request head exceeded [`MAX_REQUEST_HEAD`] bytes.
    #[error("request head too large")]
    RequestTooLarge,

    /// The peer closed the connection before a full head arrived.
    #[error("connection closed before request was complete")]
    ClosedEarly,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for HTTP wire operations.
pub type HttpResult<T> = Result<T, HttpError>;

/// A parsed inbound request. Only the request line is retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The request method, e.g. `GET`.
    pub method: String,
    /// The raw request path, e.g. `/notify/abc123`.
    pub path: String,
}

impl Request {
    /// Splits the path into segments for routing.
    ///
    /// One leading `/` is stripped, then the remainder is split on `/`.
    /// `/` yields `[""]` so that the directory router's empty-segment
    /// entry matches the root.
    pub fn path_segments(&self) -> Vec<&str> {
        let trimmed = self.path.strip_prefix('/').unwrap_or(&self.path);
        trimmed.split('/').collect()
    }
}

/// An outbound response: status, reason phrase and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub reason: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    /// 200 OK with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Response {
            status: 200,
            reason: "OK",
            body: body.into(),
        }
    }

    /// 403 Forbidden with the given body.
    pub fn forbidden(body: impl Into<Vec<u8>>) -> Self {
        Response {
            status: 403,
            reason: "Forbidden",
            body: body.into(),
        }
    }

    /// The fixed 404 response for unmatched routes.
    pub fn not_found() -> Self {
        Response {
            status: 404,
            reason: "Not Found",
            body: b"404 - Not Found".to_vec(),
        }
    }

    /// Writes the response in HTTP/1.0 wire format.
    pub async fn write_to<W>(&self, writer: &mut W) -> HttpResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        let head = format!(
            "HTTP/1.0 {} {}\r\nContent-Length: {}\r\n\r\n",
            self.status,
            self.reason,
            self.body.len()
        );
        writer.write_all(head.as_bytes()).await?;
        writer.write_all(&self.body).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Reads one request head from the stream and parses its request line.
///
/// Bytes are consumed until `\r\n\r\n`; headers are discarded. Pipelined
/// data after the head is ignored (the connection is closed after one
/// response anyway).
pub async fn read_request<R>(reader: &mut R) -> HttpResult<Request>
where
    R: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    loop {
        if find_head_end(&head).is_some() {
            break;
        }
        if head.len() > MAX_REQUEST_HEAD {
            return Err(HttpError::RequestTooLarge);
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(HttpError::ClosedEarly);
        }
        head.extend_from_slice(&chunk[..n]);
    }
    parse_request_line(&head)
}

/// Returns the offset of the `\r\n\r\n` terminator, if present.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parses `METHOD SP PATH SP HTTP/x.y` from the first line of the head.
fn parse_request_line(head: &[u8]) -> HttpResult<Request> {
    let line_end = head
        .windows(2)
        .position(|w| w == b"\r\n")
        .ok_or(HttpError::Malformed)?;
    let line = std::str::from_utf8(&head[..line_end]).map_err(|_| HttpError::Malformed)?;

    let mut parts = line.split(' ');
    let method = parts.next().filter(|m| !m.is_empty());
    let path = parts.next().filter(|p| p.starts_with('/'));
    let version = parts.next().filter(|v| v.starts_with("HTTP/"));
    match (method, path, version, parts.next()) {
        (Some(method), Some(path), Some(_), None) => Ok(Request {
            method: method.to_string(),
            path: path.to_string(),
        }),
        _ => Err(HttpError::Malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(raw: &str) -> HttpResult<Request> {
        let mut reader = std::io::Cursor::new(raw.as_bytes().to_vec());
        read_request(&mut reader).await
    }

    #[tokio::test]
    async fn parses_simple_get() {
        let request = parse("GET /notify/abc HTTP/1.0\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/notify/abc");
    }

    #[tokio::test]
    async fn parses_head_split_across_reads() {
        // Cursor delivers everything at once, so exercise the incremental
        // path with a reader that trickles one byte at a time.
        struct Trickle(std::io::Cursor<Vec<u8>>);
        impl AsyncRead for Trickle {
            fn poll_read(
                mut self: std::pin::Pin<&mut Self>,
                cx: &mut std::task::Context<'_>,
                buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                let mut byte = [0u8; 1];
                let mut one = tokio::io::ReadBuf::new(&mut byte);
                let poll = std::pin::Pin::new(&mut self.0).poll_read(cx, &mut one);
                if let std::task::Poll::Ready(Ok(())) = &poll {
                    buf.put_slice(one.filled());
                }
                poll
            }
        }

        let mut reader = Trickle(std::io::Cursor::new(
            b"GET / HTTP/1.0\r\n\r\n".to_vec(),
        ));
        let request = read_request(&mut reader).await.unwrap();
        assert_eq!(request.path, "/");
    }

    #[tokio::test]
    async fn rejects_garbage() {
        assert!(matches!(
            parse("NOT AN HTTP REQUEST\r\n\r\n").await,
            Err(HttpError::Malformed)
        ));
    }

    #[tokio::test]
    async fn rejects_missing_version() {
        assert!(matches!(
            parse("GET /\r\n\r\n").await,
            Err(HttpError::Malformed)
        ));
    }

    #[tokio::test]
    async fn rejects_relative_path() {
        assert!(matches!(
            parse("GET notify HTTP/1.0\r\n\r\n").await,
            Err(HttpError::Malformed)
        ));
    }

    #[tokio::test]
    async fn rejects_truncated_head() {
        assert!(matches!(
            parse("GET / HTTP/1.0\r\n").await,
            Err(HttpError::ClosedEarly)
        ));
    }

    #[tokio::test]
    async fn rejects_oversized_head() {
        let raw = format!("GET /{} HTTP/1.0\r\n\r\n", "a".repeat(20_000));
        assert!(matches!(
            parse(&raw).await,
            Err(HttpError::RequestTooLarge)
        ));
    }

    #[tokio::test]
    async fn response_wire_format_is_exact() {
        let mut out = Vec::new();
        Response::ok("hello").write_to(&mut out).await.unwrap();
        assert_eq!(out, b"HTTP/1.0 200 OK\r\nContent-Length: 5\r\n\r\nhello");
    }

    #[tokio::test]
    async fn not_found_body_is_fixed() {
        let mut out = Vec::new();
        Response::not_found().write_to(&mut out).await.unwrap();
        assert_eq!(
            out,
            b"HTTP/1.0 404 Not Found\r\nContent-Length: 15\r\n\r\n404 - Not Found"
        );
    }

    #[test]
    fn path_segments_root() {
        let request = Request {
            method: "GET".to_string(),
            path: "/".to_string(),
        };
        assert_eq!(request.path_segments(), vec![""]);
    }

    #[test]
    fn path_segments_nested() {
        let request = Request {
            method: "GET".to_string(),
            path: "/notify/abc123".to_string(),
        };
        assert_eq!(request.path_segments(), vec!["notify", "abc123"]);
    }
}
