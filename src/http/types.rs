//! Core HTTP protocol types: methods, versions, status codes, and the
//! case-insensitive header map shared by requests and responses.

use std::{borrow::Cow, collections::HashMap};

/// HTTP request methods.
///
/// # References
/// [RFC 7231, Section 4](https://datatracker.ietf.org/doc/html/rfc7231#section-4)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Head,
    Put,
    Delete,
    Trace,
    Patch,
    Options,
    Connect,
}

impl Method {
    pub(crate) fn from_bytes(src: &[u8]) -> Option<Self> {
        match src {
            b"GET" => Some(Method::Get),
            b"POST" => Some(Method::Post),
            b"HEAD" => Some(Method::Head),
            b"PUT" => Some(Method::Put),
            b"DELETE" => Some(Method::Delete),
            b"TRACE" => Some(Method::Trace),
            b"PATCH" => Some(Method::Patch),
            b"OPTIONS" => Some(Method::Options),
            b"CONNECT" => Some(Method::Connect),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
            Method::Options => "OPTIONS",
            Method::Connect => "CONNECT",
        }
    }
}

/// HTTP protocol version. Only HTTP/1.0 and HTTP/1.1 are accepted on the
/// wire (spec non-goal: HTTP/2, HTTP/3).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub(crate) fn from_bytes(src: &[u8]) -> Option<Self> {
        match src {
            b"HTTP/1.1" => Some(Version::Http11),
            b"HTTP/1.0" => Some(Version::Http10),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http11 => "HTTP/1.1",
            Version::Http10 => "HTTP/1.0",
        }
    }

    /// `Connection: keep-alive` is the default for HTTP/1.1, and
    /// `close` is the default for HTTP/1.0.
    pub(crate) fn default_keep_alive(&self) -> bool {
        matches!(self, Version::Http11)
    }
}

macro_rules! status_codes {
    ($(
        $(#[$docs:meta])*
        $name:ident = ($num:expr, $str:expr);
    )+) => {
        /// HTTP status codes with their canonical reason phrase.
        ///
        /// The reason phrase table is hard-coded rather than loaded from a
        /// bundled JSON file.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            $(#[$docs])*
            $name = $num,
        )+ }

        impl StatusCode {
            pub const fn code(&self) -> u16 {
                match self { $( StatusCode::$name => $num, )+ }
            }

            /// Reason phrase for the status line (e.g. `"OK"`, `"Not Found"`).
            pub const fn reason_phrase(&self) -> &'static str {
                match self { $( StatusCode::$name => $str, )+ }
            }
        }
    }
}

status_codes! {
    Continue = (100, "Continue");
    SwitchingProtocols = (101, "Switching Protocols");
    Ok = (200, "OK");
    Created = (201, "Created");
    Accepted = (202, "Accepted");
    NoContent = (204, "No Content");
    PartialContent = (206, "Partial Content");
    MovedPermanently = (301, "Moved Permanently");
    Found = (302, "Found");
    SeeOther = (303, "See Other");
    NotModified = (304, "Not Modified");
    TemporaryRedirect = (307, "Temporary Redirect");
    PermanentRedirect = (308, "Permanent Redirect");
    BadRequest = (400, "Bad Request");
    Unauthorized = (401, "Unauthorized");
    Forbidden = (403, "Forbidden");
    NotFound = (404, "Not Found");
    MethodNotAllowed = (405, "Method Not Allowed");
    RequestTimeout = (408, "Request Timeout");
    Conflict = (409, "Conflict");
    LengthRequired = (411, "Length Required");
    PayloadTooLarge = (413, "Payload Too Large");
    UriTooLong = (414, "URI Too Long");
    UnsupportedMediaType = (415, "Unsupported Media Type");
    RequestHeaderFieldsTooLarge = (431, "Request Header Fields Too Large");
    InternalServerError = (500, "Internal Server Error");
    NotImplemented = (501, "Not Implemented");
    ServiceUnavailable = (503, "Service Unavailable");
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
}

#[inline]
pub(crate) fn to_lower_ascii(s: &str) -> Cow<'_, str> {
    if s.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(s.to_ascii_lowercase())
    } else {
        Cow::Borrowed(s)
    }
}

/// A mapping where string keys are compared case-insensitively
/// (ASCII-only). Used for both request and response headers.
///
/// Lookup/insertion/deletion lowercase the key before touching the
/// backing map; iteration order is unspecified.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    inner: HashMap<String, String>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.inner
            .insert(to_lower_ascii(name.as_ref()).into_owned(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(to_lower_ascii(name).as_ref()).map(|s| s.as_str())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.inner.remove(to_lower_ascii(name).as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(to_lower_ascii(name).as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// A read-only view into a [`HeaderMap`]. Cheap to construct: it
/// borrows the underlying map rather than copying it.
#[derive(Debug, Clone, Copy)]
pub struct HeaderMapView<'a>(pub(crate) &'a HeaderMap);

impl<'a> HeaderMapView<'a> {
    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.0.iter()
    }
}

/// Canonicalizes a header name to `Title-Case-With-Hyphens` for the wire
/// (e.g. `content-type` -> `Content-Type`), matching
/// `original_source/mhttp/messages.py::_capitalize_header`.
pub(crate) fn title_case_header(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut cap_next = true;
    for ch in name.chars() {
        if ch == '-' {
            out.push(ch);
            cap_next = true;
        } else if cap_next {
            out.extend(ch.to_uppercase());
            cap_next = false;
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_map_is_case_insensitive() {
        let mut m = HeaderMap::new();
        m.insert("Content-Type", "text/plain");
        assert_eq!(m.get("content-type"), Some("text/plain"));
        assert_eq!(m.get("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(m.get("Content-Type"), Some("text/plain"));
    }

    #[test]
    fn title_case_matches_common_headers() {
        assert_eq!(title_case_header("content-length"), "Content-Length");
        assert_eq!(title_case_header("x-request-id"), "X-Request-Id");
        assert_eq!(title_case_header("etag"), "Etag");
    }

    #[test]
    fn method_parses_known_tokens_only() {
        assert_eq!(Method::from_bytes(b"GET"), Some(Method::Get));
        assert_eq!(Method::from_bytes(b"get"), None);
        assert_eq!(Method::from_bytes(b"FOO"), None);
    }
}
