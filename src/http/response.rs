//! Response construction and wire serialization.
//!
//! Grounded on `original_source/mhttp/messages.py` (`HttpResponse`,
//! `make_response`, `file_response`, `_capitalize_header`,
//! `get_header_string`) for status lookup, header Title-Casing, and the
//! value-to-body dispatch rules. The header-ordering groups (first-set,
//! other headers, `Set-Cookie` lines, last-set) are grounded on
//! `constants/header_keys.py::REP_HEADERS` for the default "last" set.

use crate::errors::HttpError;
use crate::http::cookie::Cookie;
use crate::http::types::{title_case_header, HeaderMap, StatusCode, Version};
use std::collections::BTreeSet;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Header names emitted last by default, after the ordinary headers and
/// `Set-Cookie` lines. Mirrors `REP_HEADERS` in the source's constants.
pub fn default_last_set() -> BTreeSet<String> {
    [
        "Trailer",
        "Content-Disposition",
        "Content-Type",
        "Transfer-Encoding",
        "Content-Language",
        "Content-Location",
        "Content-Length",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Header names emitted first by default, before everything else.
pub fn default_first_set() -> BTreeSet<String> {
    ["Server"].into_iter().map(String::from).collect()
}

/// Either an empty body, a fixed-length body with a known size, or a
/// body streamed with `Transfer-Encoding: chunked`.
pub enum ResponseBody {
    None,
    Sized(Pin<Box<dyn AsyncRead + Send>>, u64),
    Chunked(Pin<Box<dyn AsyncRead + Send>>),
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::None => write!(f, "ResponseBody::None"),
            ResponseBody::Sized(_, len) => write!(f, "ResponseBody::Sized(.., {len})"),
            ResponseBody::Chunked(_) => write!(f, "ResponseBody::Chunked(..)"),
        }
    }
}

/// A high-level value a handler can hand to [`Response::set_body_value`]
/// instead of assembling a [`ResponseBody`] by hand.
pub enum BodyValue {
    Text(String),
    Bytes(Vec<u8>),
    /// A stream and its length, when known; `None` means chunked.
    Stream(Pin<Box<dyn AsyncRead + Send>>, Option<u64>),
}

/// Chunk size a freshly constructed [`Response`] uses until something
/// overrides it, either a handler calling [`Response::set_body_chunked`]
/// with an explicit size or a connection applying its own
/// [`RespLimits`](crate::limits::RespLimits) default.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// An outgoing HTTP response: status, headers, cookies, and body.
#[derive(Debug)]
pub struct Response {
    pub version: Version,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub cookies: Vec<Cookie>,
    pub body: ResponseBody,
    pub chunk_size: usize,
    first_set: BTreeSet<String>,
    last_set: BTreeSet<String>,
}

impl Response {
    pub fn new(status: StatusCode, version: Version) -> Self {
        Self {
            version,
            status,
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            body: ResponseBody::None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            first_set: default_first_set(),
            last_set: default_last_set(),
        }
    }

    pub fn with_header_groups(mut self, first_set: BTreeSet<String>, last_set: BTreeSet<String>) -> Self {
        self.first_set = first_set;
        self.last_set = last_set;
        self
    }

    /// Sets a fixed-length body; clears any prior `Transfer-Encoding`.
    pub fn set_body(&mut self, stream: Pin<Box<dyn AsyncRead + Send>>, size: u64) {
        self.headers.remove("Transfer-Encoding");
        self.headers.insert("Content-Length", size.to_string());
        self.body = ResponseBody::Sized(stream, size);
    }

    /// Sets a chunked body, appending `chunked` to any existing
    /// `Transfer-Encoding` value (matches `set_body_chunked` in the source).
    pub fn set_body_chunked(&mut self, stream: Pin<Box<dyn AsyncRead + Send>>, chunk_size: usize) {
        self.headers.remove("Content-Length");
        let te = match self.headers.get("Transfer-Encoding") {
            Some(existing) => format!("{}, chunked", existing.trim()),
            None => "chunked".to_string(),
        };
        self.headers.insert("Transfer-Encoding", te);
        self.chunk_size = chunk_size;
        self.body = ResponseBody::Chunked(stream);
    }

    /// Sets the body from a high-level value instead of a raw stream,
    /// inferring `Content-Type` and whether the body is sized or chunked.
    /// Mirrors `make_response`'s dispatch: a string becomes `text/plain`,
    /// raw bytes become `application/octet-stream`, and a stream is sized
    /// when its length is known and chunked otherwise.
    pub fn set_body_value(&mut self, value: BodyValue) {
        match value {
            BodyValue::Text(text) => {
                let bytes = text.into_bytes();
                let len = bytes.len() as u64;
                self.headers.insert("Content-Type", "text/plain");
                self.set_body(Box::pin(std::io::Cursor::new(bytes)), len);
            }
            BodyValue::Bytes(bytes) => {
                let len = bytes.len() as u64;
                self.headers.insert("Content-Type", "application/octet-stream");
                self.set_body(Box::pin(std::io::Cursor::new(bytes)), len);
            }
            BodyValue::Stream(stream, Some(len)) => {
                self.headers.insert("Content-Type", "application/octet-stream");
                self.set_body(stream, len);
            }
            BodyValue::Stream(stream, None) => {
                self.headers.insert("Content-Type", "application/octet-stream");
                self.set_body_chunked(stream, DEFAULT_CHUNK_SIZE);
            }
        }
    }

    /// Sets the body to `value` serialized as JSON, matching
    /// `make_response`'s fallback branch for anything that isn't a
    /// string or raw bytes.
    pub fn set_body_json<T: serde::Serialize>(&mut self, value: &T) -> Result<(), HttpError> {
        let json = crate::json::to_string(value)?.into_bytes();
        let len = json.len() as u64;
        self.headers.insert("Content-Type", "application/json");
        self.set_body(Box::pin(std::io::Cursor::new(json)), len);
        Ok(())
    }

    pub fn add_cookie(&mut self, cookie: Cookie) {
        self.cookies.push(cookie);
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.body, ResponseBody::Chunked(_))
    }

    /// `Connection: keep-alive` unless the response explicitly sets
    /// `close`; defaults per version the same way
    /// [`Request::keep_connection`](crate::http::Request::keep_connection) does.
    pub fn keep_connection(&self) -> bool {
        match self.headers.get("Connection") {
            Some(v) => v.eq_ignore_ascii_case("keep-alive"),
            None => self.version.default_keep_alive(),
        }
    }

    /// Renders the status line and header section, ending with the
    /// blank-line terminator. `Content-Length` is emitted for an empty
    /// or sized body (`0` in the empty case) and omitted entirely for a
    /// chunked body, matching the source's `get_header_string`.
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut lines: Vec<String> = Vec::new();
        lines.push(format!(
            "{} {} {}",
            self.version.as_str(),
            self.status.code(),
            self.status.reason_phrase()
        ));

        let mut others: Vec<(&str, &str)> = Vec::new();
        let mut first: Vec<(&str, &str)> = Vec::new();
        let mut last: Vec<(&str, &str)> = Vec::new();
        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("Content-Length") {
                continue;
            }
            let canonical = title_case_header(name);
            if self.first_set.iter().any(|h| h.eq_ignore_ascii_case(name)) {
                first.push((name, value));
            } else if self.last_set.iter().any(|h| h.eq_ignore_ascii_case(name)) {
                last.push((name, value));
            } else {
                others.push((name, value));
            }
            let _ = canonical;
        }

        for (name, value) in &first {
            lines.push(format!("{}: {value}", title_case_header(name)));
        }
        for (name, value) in &others {
            lines.push(format!("{}: {value}", title_case_header(name)));
        }
        for cookie in &self.cookies {
            lines.push(format!("Set-Cookie: {}", cookie.to_header_value()));
        }
        for (name, value) in &last {
            lines.push(format!("{}: {value}", title_case_header(name)));
        }

        match &self.body {
            ResponseBody::Chunked(_) => {}
            ResponseBody::Sized(_, size) => lines.push(format!("Content-Length: {size}")),
            ResponseBody::None => lines.push("Content-Length: 0".to_string()),
        }
        lines.push(String::new());
        let joined = lines.join("\r\n");
        let mut out = joined.into_bytes();
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// Writes a response's header section and body to a socket.
///
/// Grounded on `original_source/mhttp/socket_wrapper.py::_send` /
/// `_send_chunked` for the fixed-size-chunk send loop and the
/// hex-length chunk framing.
pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &mut Response,
) -> std::io::Result<()> {
    writer.write_all(&response.header_bytes()).await?;
    match &mut response.body {
        ResponseBody::None => {}
        ResponseBody::Sized(stream, _) => send_sized(writer, stream.as_mut()).await?,
        ResponseBody::Chunked(stream) => {
            send_chunked(writer, stream.as_mut(), response.chunk_size).await?
        }
    }
    writer.flush().await
}

async fn send_sized<W: AsyncWrite + Unpin>(
    writer: &mut W,
    stream: &mut (dyn AsyncRead + Unpin + Send),
) -> std::io::Result<()> {
    let mut buf = vec![0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
    }
}

async fn send_chunked<W: AsyncWrite + Unpin>(
    writer: &mut W,
    stream: &mut (dyn AsyncRead + Unpin + Send),
    chunk_size: usize,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = stream.read(&mut buf).await?;
        let len_hex = format!("{n:x}");
        writer.write_all(len_hex.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
        writer.write_all(&buf[..n]).await?;
        writer.write_all(b"\r\n").await?;
        if n == 0 {
            return Ok(());
        }
    }
}

/// Where [`file_response`] reads its bytes from: a path on disk (length
/// and `Last-Modified` are read from its metadata) or an arbitrary
/// stream of unknown length (sent chunked, no `Last-Modified`).
pub enum FileSource {
    Path(std::path::PathBuf),
    Stream(Pin<Box<dyn AsyncRead + Send>>),
}

/// Builds a response that serves a file, matching `file_response`:
/// `Content-Disposition` (`inline` or `attachment`), a `Content-Type`
/// guessed from the filename when none is given, and — only when `src`
/// is a path — a `Last-Modified` header from the file's mtime. A stream
/// source has no mtime to report, so `Last-Modified` is omitted.
pub async fn file_response(
    version: Version,
    src: FileSource,
    name: Option<&str>,
    attachment: bool,
    content_type: Option<&str>,
) -> std::io::Result<Response> {
    let mut resp = Response::new(StatusCode::Ok, version);

    let (stream, len, filename, guessed_name, mtime): (
        Pin<Box<dyn AsyncRead + Send>>,
        Option<u64>,
        Option<String>,
        bool,
        Option<std::time::SystemTime>,
    ) = match src {
        FileSource::Path(path) => {
            let file = tokio::fs::File::open(&path).await?;
            let metadata = file.metadata().await?;
            let name_from_path = path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned());
            (
                Box::pin(file),
                Some(metadata.len()),
                name_from_path,
                true,
                metadata.modified().ok(),
            )
        }
        FileSource::Stream(stream) => (stream, None, None, false, None),
    };

    let filename = name
        .map(String::from)
        .or(filename)
        .unwrap_or_else(|| "file".to_string());
    let content_type = content_type.map(String::from).unwrap_or_else(|| {
        if guessed_name || name.is_some() {
            mime_guess::from_path(&filename)
                .first_or_octet_stream()
                .to_string()
        } else {
            "application/octet-stream".to_string()
        }
    });

    resp.headers.insert("Content-Type", content_type);
    let disposition = if attachment {
        format!("attachment; filename=\"{filename}\"")
    } else {
        format!("inline; filename=\"{filename}\"")
    };
    resp.headers.insert("Content-Disposition", disposition);
    if let Some(modified) = mtime {
        resp.headers.insert("Last-Modified", httpdate::fmt_http_date(modified));
    }

    match len {
        Some(size) => resp.set_body(stream, size),
        None => resp.set_body_chunked(stream, DEFAULT_CHUNK_SIZE),
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_bytes_orders_groups_and_title_cases_names() {
        let mut resp = Response::new(StatusCode::Ok, Version::Http11);
        resp.headers.insert("x-custom", "1");
        resp.headers.insert("Content-Type", "text/plain");
        resp.headers.insert("Server", "wirebound");
        resp.add_cookie(Cookie::simple("s", "v"));
        let text = String::from_utf8(resp.header_bytes()).unwrap();
        let server_pos = text.find("Server:").unwrap();
        let custom_pos = text.find("X-Custom:").unwrap();
        let cookie_pos = text.find("Set-Cookie:").unwrap();
        let ct_pos = text.find("Content-Type:").unwrap();
        assert!(server_pos < custom_pos);
        assert!(custom_pos < cookie_pos);
        assert!(cookie_pos < ct_pos);
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn content_length_defaults_to_zero_for_empty_body() {
        let resp = Response::new(StatusCode::NoContent, Version::Http11);
        let text = String::from_utf8(resp.header_bytes()).unwrap();
        assert!(text.contains("Content-Length: 0"));
    }

    #[tokio::test]
    async fn write_response_sends_sized_body() {
        let mut resp = Response::new(StatusCode::Ok, Version::Http11);
        resp.set_body(Box::pin(Cursor::new(b"hi".to_vec())), 2);
        let mut out = Vec::new();
        write_response(&mut out, &mut resp).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("\r\n\r\nhi"));
    }

    #[test]
    fn chunked_response_omits_content_length() {
        let mut resp = Response::new(StatusCode::Ok, Version::Http11);
        resp.set_body_chunked(Box::pin(Cursor::new(b"abcde".to_vec())), 3);
        let text = String::from_utf8(resp.header_bytes()).unwrap();
        assert!(!text.contains("Content-Length"));
        assert!(text.contains("Transfer-Encoding: chunked"));
    }

    #[test]
    fn set_body_value_text_is_sized_text_plain() {
        let mut resp = Response::new(StatusCode::Ok, Version::Http11);
        resp.set_body_value(BodyValue::Text("hi".to_string()));
        assert_eq!(resp.headers.get("Content-Type"), Some("text/plain"));
        assert!(matches!(resp.body, ResponseBody::Sized(_, 2)));
    }

    #[test]
    fn set_body_value_bytes_is_sized_octet_stream() {
        let mut resp = Response::new(StatusCode::Ok, Version::Http11);
        resp.set_body_value(BodyValue::Bytes(vec![1, 2, 3]));
        assert_eq!(resp.headers.get("Content-Type"), Some("application/octet-stream"));
        assert!(matches!(resp.body, ResponseBody::Sized(_, 3)));
    }

    #[test]
    fn set_body_value_stream_without_length_is_chunked() {
        let mut resp = Response::new(StatusCode::Ok, Version::Http11);
        resp.set_body_value(BodyValue::Stream(Box::pin(Cursor::new(b"abc".to_vec())), None));
        assert!(resp.is_chunked());
    }

    #[test]
    fn set_body_json_serializes_and_sets_content_type() {
        let mut resp = Response::new(StatusCode::Ok, Version::Http11);
        resp.set_body_json(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(resp.headers.get("Content-Type"), Some("application/json"));
        assert!(matches!(resp.body, ResponseBody::Sized(..)));
    }

    #[tokio::test]
    async fn file_response_from_path_sets_last_modified_and_disposition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        tokio::fs::write(&path, b"hello file").await.unwrap();
        let resp = file_response(Version::Http11, FileSource::Path(path), None, false, None)
            .await
            .unwrap();
        assert!(resp.headers.get("Last-Modified").is_some());
        assert_eq!(resp.headers.get("Content-Disposition"), Some("inline; filename=\"notes.txt\""));
        assert_eq!(resp.headers.get("Content-Type"), Some("text/plain"));
        assert!(matches!(resp.body, ResponseBody::Sized(_, 10)));
    }

    #[tokio::test]
    async fn file_response_from_stream_omits_last_modified_and_is_chunked() {
        let stream: Pin<Box<dyn AsyncRead + Send>> = Box::pin(Cursor::new(b"hello".to_vec()));
        let resp = file_response(
            Version::Http11,
            FileSource::Stream(stream),
            Some("report.bin"),
            true,
            None,
        )
        .await
        .unwrap();
        assert!(resp.headers.get("Last-Modified").is_none());
        assert_eq!(resp.headers.get("Content-Disposition"), Some("attachment; filename=\"report.bin\""));
        assert!(resp.is_chunked());
    }

    #[tokio::test]
    async fn write_response_sends_chunked_body_with_hex_lengths() {
        let mut resp = Response::new(StatusCode::Ok, Version::Http11);
        resp.set_body_chunked(Box::pin(Cursor::new(b"abcde".to_vec())), 3);
        let mut out = Vec::new();
        write_response(&mut out, &mut resp).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("3\r\nabc\r\n"));
        assert!(text.contains("2\r\nde\r\n"));
        assert!(text.ends_with("0\r\n\r\n"));
    }
}
