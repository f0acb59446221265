//! Streaming `multipart/form-data` parsing: a boundary-delimited
//! forward-only reader over a [`Body`](crate::spool::Body) stream.
//!
//! Grounded on `original_source/mhttp/form.py::FormReader`: a
//! pushback [`ByteBuffer`] absorbs bytes read past a boundary so the
//! next field (or the next `next_field()` call) can resume from them,
//! and boundary detection works even when the boundary straddles two
//! underlying reads.

use crate::buffer::ByteBuffer;
use crate::errors::HttpError;
use crate::http::types::HeaderMap;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Per-field metadata parsed from the `Content-Disposition`/`Content-Type`
/// headers preceding a field's body.
#[derive(Debug, Clone)]
pub struct FieldMetadata {
    pub name: String,
    pub filename: Option<String>,
    pub headers: HeaderMap,
}

impl FieldMetadata {
    /// Builds metadata from a field's raw header lines, applying the
    /// source's `FormMetadata.__init__` fallbacks: missing `Content-Type`
    /// defaults to `text/plain` for fields without a filename and
    /// `application/octet-stream` for those with one; a filename-less,
    /// non-text part synthesizes a filename from the MIME extension.
    fn from_headers(headers: HeaderMap) -> Result<Self, HttpError> {
        let disposition = headers
            .get("Content-Disposition")
            .ok_or_else(|| HttpError::bad_request("no field name"))?;
        let name = get_header_param(disposition, "name")
            .ok_or_else(|| HttpError::bad_request("no field name"))?
            .replace('"', "");
        let mut filename = get_header_param(disposition, "filename").map(|f| f.replace('"', ""));

        let mut headers = headers;
        if !headers.contains("Content-Type") {
            let default_ct = if filename.is_none() {
                "text/plain"
            } else {
                "application/octet-stream"
            };
            headers.insert("Content-Type", default_ct);
        }
        if filename.is_none() {
            let content_type = headers.get("Content-Type").unwrap_or("application/octet-stream");
            if !is_text(content_type) {
                let ext = mime_guess::get_mime_extensions_str(content_type)
                    .and_then(|exts| exts.first())
                    .copied()
                    .unwrap_or("bin");
                filename = Some(format!("{name}.{ext}"));
            }
        }

        Ok(Self {
            name,
            filename,
            headers,
        })
    }

    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }

    pub fn content_type(&self) -> &str {
        self.headers.get("Content-Type").unwrap_or("application/octet-stream")
    }
}

/// True for MIME types the source's `is_text` would consider text,
/// copied verbatim from `original_source/mhttp/helpers.py::is_text`.
pub fn is_text(content_type: &str) -> bool {
    let mut sections = content_type.splitn(2, '/');
    let mime_type = match sections.next() {
        Some(m) => m,
        None => return false,
    };
    let subtype = match sections.next() {
        Some(s) => s,
        None => return false,
    };
    if mime_type == "text" {
        return true;
    }
    if mime_type != "application" {
        return false;
    }
    matches!(
        subtype,
        "json" | "ld+json" | "x-httpd-php" | "x-sh" | "x-csh" | "xhtml+xml" | "xml"
    )
}

/// Extracts a `key=value` parameter from a header value (e.g. `boundary`
/// from a `Content-Type`, or `name`/`filename` from a
/// `Content-Disposition`). Ported from `get_header_param`.
pub fn get_header_param<'a>(header: &'a str, param: &str) -> Option<&'a str> {
    let header = header.trim();
    let needle = format!("{param}=");
    let start = header.find(&needle)? + needle.len();
    let rest = &header[start..];
    let end = rest.find(';').unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Forward-only reader over one `multipart/form-data` body, yielding
/// each field's metadata and body bytes in turn.
pub struct MultipartReader<S> {
    inner: S,
    boundary: Vec<u8>,
    boundary_with_nl: Vec<u8>,
    buffer: ByteBuffer,
    field_end: bool,
    initialized: bool,
}

impl<S> MultipartReader<S>
where
    S: AsyncRead + Unpin,
{
    pub fn new(inner: S, boundary: &str) -> Self {
        let boundary = [b"--", boundary.as_bytes()].concat();
        let boundary_with_nl = [b"\r\n".as_slice(), &boundary].concat();
        Self {
            inner,
            boundary,
            boundary_with_nl,
            buffer: ByteBuffer::new(),
            field_end: true,
            initialized: false,
        }
    }

    async fn fill(&mut self, min: usize) -> std::io::Result<()> {
        let mut tmp = vec![0u8; min.max(1024)];
        let n = self.inner.read(&mut tmp).await?;
        tmp.truncate(n);
        self.buffer.push(&tmp);
        Ok(())
    }

    async fn read_n(&mut self, n: usize) -> std::io::Result<Vec<u8>> {
        while self.buffer.len() < n {
            let before = self.buffer.len();
            self.fill(n - before).await?;
            if self.buffer.len() == before {
                break; // EOF
            }
        }
        Ok(self.buffer.pop(n))
    }

    async fn read_line_raw(&mut self) -> std::io::Result<Vec<u8>> {
        loop {
            let line = self.buffer.peek(self.buffer.len()).to_vec();
            if let Some(pos) = memchr::memchr(b'\n', &line) {
                let _ = pos;
                return Ok(self.buffer.pop_line());
            }
            let before = self.buffer.len();
            self.fill(1024).await?;
            if self.buffer.len() == before {
                return Ok(self.buffer.pop(self.buffer.len()));
            }
        }
    }

    /// Reads up to `n` bytes of the current field's body, stopping at
    /// (and consuming) the boundary if it appears within the read.
    pub async fn read_field(&mut self, n: usize) -> Result<Vec<u8>, HttpError> {
        if self.field_end {
            return Ok(Vec::new());
        }
        let chunk = self.read_n(n).await.map_err(HttpError::from)?;
        let lookahead = self.read_n(self.boundary_with_nl.len()).await.map_err(HttpError::from)?;
        let mut total = chunk;
        total.extend_from_slice(&lookahead);
        if let Some(pos) = find_subslice(&total, &self.boundary_with_nl) {
            self.field_end = true;
            let rest = total[..pos].to_vec();
            let remainder = total[pos + self.boundary_with_nl.len()..].to_vec();
            self.buffer.push(&remainder);
            return Ok(rest);
        }
        self.buffer.push(&lookahead);
        Ok(total[..total.len() - lookahead.len()].to_vec())
    }

    /// Reads the entirety of the current field into memory.
    pub async fn read_field_all(&mut self) -> Result<Vec<u8>, HttpError> {
        let mut out = Vec::new();
        loop {
            let chunk = self.read_field(1024).await?;
            if chunk.is_empty() {
                return Ok(out);
            }
            out.extend_from_slice(&chunk);
        }
    }

    /// Advances to the next field, returning its metadata, or `None` at
    /// the terminal boundary (`--boundary--`).
    pub async fn next_field(&mut self) -> Result<Option<FieldMetadata>, HttpError> {
        if !self.initialized {
            let _ = self.read_n(self.boundary.len()).await.map_err(HttpError::from)?;
            self.initialized = true;
        }
        if !self.field_end {
            while !self.read_field(1024).await?.is_empty() {}
        }
        let marker = self.read_n(2).await.map_err(HttpError::from)?;
        if marker.is_empty() || marker == b"--" {
            return Ok(None);
        }

        let mut headers = HeaderMap::new();
        loop {
            let line = self.read_line_raw().await.map_err(HttpError::from)?;
            let trimmed = strip_crlf(&line);
            if trimmed == self.boundary.as_slice() {
                return Err(HttpError::bad_request("bad form-data format"));
            }
            if trimmed.is_empty() {
                break;
            }
            let text = std::str::from_utf8(trimmed)
                .map_err(|_| HttpError::bad_request("form header is not valid UTF-8"))?;
            let (name, value) = text
                .split_once(':')
                .map(|(a, b)| (a.trim(), b.trim()))
                .ok_or_else(|| HttpError::bad_request("bad form-data header format"))?;
            headers.insert(name, value);
        }
        self.field_end = false;
        Ok(Some(FieldMetadata::from_headers(headers)?))
    }
}

fn strip_crlf(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    if needle.len() == 1 {
        return memchr::memchr(needle[0], haystack);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> Vec<u8> {
        let boundary = "XYZ";
        format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"text\"\r\n\
             \r\n\
             hello world\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             file contents\r\n\
             --{boundary}--\r\n"
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn parses_text_field_then_file_field() {
        let mut reader = MultipartReader::new(Cursor::new(sample()), "XYZ");
        let first = reader.next_field().await.unwrap().unwrap();
        assert_eq!(first.name, "text");
        assert!(!first.is_file());
        let body = reader.read_field_all().await.unwrap();
        assert_eq!(body, b"hello world");

        let second = reader.next_field().await.unwrap().unwrap();
        assert_eq!(second.name, "file");
        assert_eq!(second.filename.as_deref(), Some("a.txt"));
        let body2 = reader.read_field_all().await.unwrap();
        assert_eq!(body2, b"file contents");

        assert!(reader.next_field().await.unwrap().is_none());
    }

    #[test]
    fn is_text_matches_known_text_types() {
        assert!(is_text("text/plain"));
        assert!(is_text("application/json"));
        assert!(!is_text("application/octet-stream"));
        assert!(!is_text("image/png"));
    }

    #[test]
    fn get_header_param_extracts_boundary() {
        let header = "multipart/form-data; boundary=XYZ123";
        assert_eq!(get_header_param(header, "boundary"), Some("XYZ123"));
    }
}
