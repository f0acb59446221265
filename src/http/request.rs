//! Request parsing: the HTTP reader that turns a [`BufferedSocket`] into
//! an owned [`Request`].
//!
//! Grounded on `original_source/mhttp/socket_wrapper.py`
//! (`HttpSocketWrapper`, `ServerSocketWrapper.get_request`,
//! `check_content_headers`) for the budget-deduction shape and the
//! header/body parsing sequence.

use crate::errors::HttpError;
use crate::http::cookie::parse_cookie_header;
use crate::http::query::parse_query;
use crate::http::types::{HeaderMap, Method, StatusCode, Version};
use crate::limits::ReqLimits;
use crate::socket::{BufferedSocket, SocketError};
use crate::spool::{Body, TempFileFactory};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};

/// A fully-read HTTP request: request line, headers, cookies, query
/// arguments, and body.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub route: String,
    pub version: Version,
    pub headers: HeaderMap,
    pub cookies: HeaderMap,
    pub args: HeaderMap,
    pub body: Body,
}

impl Request {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type")
    }

    /// `Connection: keep-alive` unless explicitly set to `close`; the
    /// version's own default applies when the header is absent.
    pub fn keep_connection(&self) -> bool {
        match self.headers.get("Connection") {
            Some(v) => v.eq_ignore_ascii_case("keep-alive"),
            None => self.version.default_keep_alive(),
        }
    }

    /// Deserializes the body as JSON, depth-limited at 32.
    /// Returns `Ok(None)` if the content type isn't `application/json`.
    pub async fn json<T: serde::de::DeserializeOwned>(
        &self,
        max_body_size: u64,
    ) -> Result<Option<T>, HttpError> {
        if !matches!(self.content_type(), Some(ct) if ct.starts_with("application/json")) {
            return Ok(None);
        }
        if self.body.size() > max_body_size {
            return Err(HttpError::payload_too_large("JSON body too large"));
        }
        let bytes = self.body.data().await?;
        crate::json::from_slice(&bytes).map(Some)
    }
}

impl From<SocketError> for HttpError {
    fn from(e: SocketError) -> Self {
        match e {
            SocketError::Timeout => HttpError::timeout("socket read timed out"),
            SocketError::LineTooLong => {
                HttpError::new(StatusCode::RequestHeaderFieldsTooLarge, "header line too long")
            }
            SocketError::Io(io) => HttpError::internal(io.to_string()),
        }
    }
}

/// Drives header-section and body-phase reads against one connection's
/// socket, consuming a fresh [`ReqLimits`] budget for every request.
pub struct HttpReader<'a, S> {
    socket: &'a mut BufferedSocket<S>,
    limits: ReqLimits,
    remaining_time: Duration,
    deadline: Instant,
}

impl<'a, S> HttpReader<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(socket: &'a mut BufferedSocket<S>, limits: ReqLimits) -> Self {
        let deadline = Instant::now() + limits.request_timeout;
        Self {
            socket,
            remaining_time: limits.request_timeout,
            limits,
            deadline,
        }
    }

    fn reset_timers(&mut self) {
        self.remaining_time = self.limits.request_timeout;
        self.deadline = Instant::now() + self.limits.request_timeout;
    }

    async fn read_line_budgeted(&mut self, limit: usize) -> Result<Vec<u8>, HttpError> {
        let start = Instant::now();
        self.socket.timeout = self.remaining_time;
        let line = self.socket.read_line(limit).await.map_err(HttpError::from)?;
        self.remaining_time = self
            .remaining_time
            .checked_sub(start.elapsed())
            .ok_or_else(|| HttpError::timeout("request exceeded its time budget"))?;
        Ok(line)
    }

    async fn read_budgeted(&mut self, n: usize) -> Result<Vec<u8>, HttpError> {
        let start = Instant::now();
        self.socket.timeout = self.remaining_time;
        let data = self.socket.read(n).await.map_err(HttpError::from)?;
        self.remaining_time = self
            .remaining_time
            .checked_sub(start.elapsed())
            .ok_or_else(|| HttpError::timeout("request exceeded its time budget"))?;
        Ok(data)
    }

    /// Reads the whole header section: request line plus `Name: value`
    /// lines until a blank line.
    async fn read_header_strings(&mut self) -> Result<Vec<String>, HttpError> {
        self.reset_timers();
        let mut lines = Vec::new();
        loop {
            let raw = self.read_line_budgeted(self.limits.max_header_size).await?;
            if raw.is_empty() {
                break;
            }
            let line = String::from_utf8(raw)
                .map_err(|_| HttpError::bad_request("header line is not valid UTF-8"))?;
            lines.push(line);
        }
        Ok(lines)
    }

    /// Reads and fully parses one request off the socket. Returns `Ok(None)`
    /// when the peer closed the connection before sending anything (a
    /// clean keep-alive close, not a protocol violation) — the connection
    /// loop distinguishes this from a malformed request to decide whether
    /// an error response is owed.
    pub async fn read_request(&mut self) -> Result<Option<Request>, HttpError> {
        let header_strings = self.read_header_strings().await?;
        let request_line = match header_strings.first() {
            Some(line) => line,
            None => return Ok(None),
        };
        let parts: Vec<&str> = request_line.split(' ').collect();
        if parts.len() != 3 {
            return Err(HttpError::bad_request(
                "first line invalid, should be {Method} {route} {protocol}",
            ));
        }
        let method = Method::from_bytes(parts[0].as_bytes())
            .ok_or_else(|| HttpError::bad_request("method name invalid"))?;
        let version = Version::from_bytes(parts[2].as_bytes())
            .ok_or_else(|| HttpError::new(StatusCode::HttpVersionNotSupported, "unsupported version"))?;

        let (route, args) = match parts[1].split_once('?') {
            Some((route, query)) => (route.to_string(), parse_query(query)?),
            None => (parts[1].to_string(), HeaderMap::new()),
        };

        let mut headers = HeaderMap::new();
        let mut cookies = HeaderMap::new();
        for line in &header_strings[1..] {
            let (title, content) = line
                .split_once(':')
                .map(|(a, b)| (a.trim(), b.trim()))
                .ok_or_else(|| HttpError::bad_request("header format invalid"))?;
            if title.eq_ignore_ascii_case("Cookie") {
                for (k, v) in parse_cookie_header(content)?.iter() {
                    cookies.insert(k, v);
                }
            } else {
                headers.insert(title, content);
            }
        }

        let body = self.read_body(&mut headers).await?;

        Ok(Some(Request {
            method,
            route,
            version,
            headers,
            cookies,
            args,
            body,
        }))
    }

    /// Reads the body per `Content-Length` or chunked transfer-encoding,
    /// per `check_content_headers` in the source.
    async fn read_body(&mut self, headers: &mut HeaderMap) -> Result<Body, HttpError> {
        let transfer_encoding = headers.get("Transfer-Encoding").map(str::to_string);
        let is_chunked = transfer_encoding
            .as_deref()
            .and_then(|t| t.rsplit(',').next())
            .map(|t| t.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);

        let length: u64 = match headers.get("Content-Length") {
            Some(v) => v
                .parse()
                .map_err(|_| HttpError::length_required("Content-Length value invalid"))?,
            None => 0,
        };
        if length > self.limits.max_body_size {
            return Err(HttpError::payload_too_large(format!(
                "Content-Length too big. Max is {} bytes",
                self.limits.max_body_size
            )));
        }
        if !is_chunked && length == 0 {
            return Ok(Body::empty());
        }

        let mut factory = TempFileFactory::new(crate::limits::TempFileLimits {
            max_mem_size: self.limits.temp_file_spill_size,
        });
        let mut remaining_size = self.limits.max_body_size as i64;

        if is_chunked {
            let has_trailer = headers.contains("Trailer");
            let trailer = self
                .read_chunked_body(&mut factory, &mut remaining_size, has_trailer)
                .await?;
            if let Some(trailer) = trailer {
                for (k, v) in trailer.iter() {
                    headers.insert(k, v);
                }
            }
        } else {
            remaining_size -= length as i64;
            if remaining_size < 0 {
                return Err(HttpError::payload_too_large("Content-Length exceeds body budget"));
            }
            self.read_chunk(&mut factory, length).await?;
        }

        self.reset_timers();
        factory.finalize().await.map_err(HttpError::from)
    }

    async fn read_chunk(&mut self, factory: &mut TempFileFactory, mut length: u64) -> Result<(), HttpError> {
        const IO_CHUNK: u64 = 1024;
        while length > 0 {
            let to_read = IO_CHUNK.min(length) as usize;
            let received = self.read_budgeted(to_read).await?;
            if received.is_empty() {
                return Err(HttpError::bad_request("connection closed mid-body"));
            }
            factory.append(&received).await.map_err(HttpError::from)?;
            length -= received.len() as u64;
        }
        Ok(())
    }

    /// Consumes exactly 2 bytes, expected to be the `\r\n` that terminates
    /// a chunk's data before the next chunk-size line.
    async fn consume_chunk_terminator(&mut self) -> Result<(), HttpError> {
        let mut got = Vec::with_capacity(2);
        while got.len() < 2 {
            let piece = self.read_budgeted(2 - got.len()).await?;
            if piece.is_empty() {
                return Err(HttpError::bad_request("connection closed mid-body"));
            }
            got.extend_from_slice(&piece);
        }
        if got != b"\r\n" {
            return Err(HttpError::bad_request("chunk data missing CRLF terminator"));
        }
        Ok(())
    }

    /// Decodes `Transfer-Encoding: chunked`, enforcing the budget after
    /// every chunk-size line (spec's canonical rule: reject when the
    /// running remainder would go strictly below zero).
    async fn read_chunked_body(
        &mut self,
        factory: &mut TempFileFactory,
        remaining_size: &mut i64,
        has_trailer: bool,
    ) -> Result<Option<HeaderMap>, HttpError> {
        loop {
            let limit = remaining_size.unsigned_abs().to_string().len() + 16;
            let size_line = self.read_line_budgeted(limit).await?;
            let size_str = std::str::from_utf8(&size_line)
                .map_err(|_| HttpError::bad_request("chunk size is not valid UTF-8"))?
                .trim();
            let length = u64::from_str_radix(size_str, 16)
                .map_err(|_| HttpError::bad_request("chunk size invalid"))?;
            *remaining_size -= length as i64;
            if *remaining_size < 0 {
                return Err(HttpError::payload_too_large("request too big"));
            }
            if length == 0 {
                if has_trailer {
                    let trailer_lines = self.read_header_strings().await?;
                    let mut trailer = HeaderMap::new();
                    for line in trailer_lines {
                        let (k, v) = line
                            .split_once(':')
                            .map(|(a, b)| (a.trim(), b.trim()))
                            .ok_or_else(|| HttpError::bad_request("trailer format invalid"))?;
                        trailer.insert(k, v);
                    }
                    return Ok(Some(trailer));
                }
                let _ = self.read_line_budgeted(2).await;
                return Ok(None);
            }
            self.read_chunk(factory, length).await?;
            self.consume_chunk_terminator().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn parses_request_line_headers_query_and_cookies() {
        let (client, mut server) = duplex(4096);
        server
            .write_all(b"GET /a/b?x=1&y=2 HTTP/1.1\r\nHost: h\r\nCookie: Session=abc; foo=bar\r\n\r\n")
            .await
            .unwrap();
        let mut sock = BufferedSocket::new(client);
        let mut reader = HttpReader::new(&mut sock, ReqLimits::default());
        let req = reader.read_request().await.unwrap().unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.route, "/a/b");
        assert_eq!(req.args.get("x"), Some("1"));
        assert_eq!(req.args.get("y"), Some("2"));
        assert_eq!(req.cookies.get("Session"), Some("abc"));
        assert_eq!(req.cookies.get("foo"), Some("bar"));
        assert_eq!(req.body.size(), 0);
    }

    #[tokio::test]
    async fn reads_content_length_body() {
        let (client, mut server) = duplex(4096);
        server
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap();
        let mut sock = BufferedSocket::new(client);
        let mut reader = HttpReader::new(&mut sock, ReqLimits::default());
        let req = reader.read_request().await.unwrap().unwrap();
        assert_eq!(req.body.data().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn body_spills_to_disk_once_past_spill_threshold_but_under_max() {
        let body = vec![b'x'; 16];
        let (client, mut server) = duplex(4096);
        server
            .write_all(format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", body.len()).as_bytes())
            .await
            .unwrap();
        server.write_all(&body).await.unwrap();
        let mut sock = BufferedSocket::new(client);
        let limits = ReqLimits {
            temp_file_spill_size: 8,
            ..ReqLimits::default()
        };
        let mut reader = HttpReader::new(&mut sock, limits);
        let req = reader.read_request().await.unwrap().unwrap();
        assert!(matches!(req.body, Body::Disk(..)));
        assert_eq!(req.body.data().await.unwrap(), body);
    }

    #[tokio::test]
    async fn reads_chunked_body() {
        let (client, mut server) = duplex(4096);
        server
            .write_all(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n")
            .await
            .unwrap();
        let mut sock = BufferedSocket::new(client);
        let mut reader = HttpReader::new(&mut sock, ReqLimits::default());
        let req = reader.read_request().await.unwrap().unwrap();
        assert_eq!(req.body.data().await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn reads_chunked_body_with_three_chunks() {
        // Exercises the per-chunk CRLF terminator consumed between
        // chunk-data and the next chunk-size line across more than one
        // boundary, not just the final zero-length chunk's.
        let (client, mut server) = duplex(4096);
        server
            .write_all(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n1\r\na\r\n1\r\nb\r\n1\r\nc\r\n0\r\n\r\n")
            .await
            .unwrap();
        let mut sock = BufferedSocket::new(client);
        let mut reader = HttpReader::new(&mut sock, ReqLimits::default());
        let req = reader.read_request().await.unwrap().unwrap();
        assert_eq!(req.body.data().await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn reads_chunked_body_with_trailer() {
        let (client, mut server) = duplex(4096);
        server
            .write_all(
                b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nTrailer: X-Checksum\r\n\r\n\
                  5\r\nhello\r\n0\r\nX-Checksum: abc123\r\n\r\n",
            )
            .await
            .unwrap();
        let mut sock = BufferedSocket::new(client);
        let mut reader = HttpReader::new(&mut sock, ReqLimits::default());
        let req = reader.read_request().await.unwrap().unwrap();
        assert_eq!(req.body.data().await.unwrap(), b"hello");
        assert_eq!(req.headers.get("X-Checksum"), Some("abc123"));
    }

    #[tokio::test]
    async fn rejects_invalid_method() {
        let (client, mut server) = duplex(4096);
        server.write_all(b"FOO / HTTP/1.1\r\n\r\n").await.unwrap();
        let mut sock = BufferedSocket::new(client);
        let mut reader = HttpReader::new(&mut sock, ReqLimits::default());
        assert!(reader.read_request().await.is_err());
    }

    #[tokio::test]
    async fn clean_close_before_any_bytes_is_not_an_error() {
        let (client, server) = duplex(4096);
        drop(server);
        let mut sock = BufferedSocket::new(client);
        let mut reader = HttpReader::new(&mut sock, ReqLimits::default());
        assert!(reader.read_request().await.unwrap().is_none());
    }
}
