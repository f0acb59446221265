//! `Set-Cookie` construction and `Cookie:` request-header parsing.
//!
//! Grounded on `original_source/mhttp/messages.py::HttpCookie`: the
//! attribute ordering of the rendered header, and the
//! `SameSite=None` requires `Secure` validation.

use crate::errors::HttpError;
use crate::http::types::HeaderMap;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// A cookie to be sent via `Set-Cookie`.
#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub expire_date: Option<SystemTime>,
    pub max_age: Option<i64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub domain: Option<String>,
}

impl Cookie {
    /// Constructs a cookie. Fails with `BadRequest` if `same_site` is
    /// `None` without `secure` set, which browsers reject outright.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        path: impl Into<String>,
        expire_date: Option<SystemTime>,
        max_age: Option<i64>,
        http_only: bool,
        secure: bool,
        same_site: SameSite,
        domain: Option<String>,
    ) -> Result<Self, HttpError> {
        if !secure && same_site == SameSite::None {
            return Err(HttpError::bad_request(
                "cookies with SameSite=None must be Secure",
            ));
        }
        Ok(Self {
            name: name.into(),
            value: value.into(),
            path: path.into(),
            expire_date,
            max_age,
            http_only,
            secure,
            same_site,
            domain,
        })
    }

    pub fn simple(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: "/".to_string(),
            expire_date: None,
            max_age: None,
            http_only: false,
            secure: false,
            same_site: SameSite::Lax,
            domain: None,
        }
    }

    /// Renders the `Set-Cookie` value, in the attribute order the source
    /// uses: `name=value`, `path` (if not `/`), `max-age`, `HttpOnly`,
    /// `Secure`, `SameSite`, `Domain`, `Expires`.
    pub fn to_header_value(&self) -> String {
        let mut parts = vec![format!("{}={}", self.name, self.value)];
        if self.path != "/" {
            parts.push(format!("path={}", self.path));
        }
        if let Some(max_age) = self.max_age {
            parts.push(format!("max-age={max_age}"));
        }
        if self.http_only {
            parts.push("HttpOnly".to_string());
        }
        if self.secure {
            parts.push("Secure".to_string());
        }
        parts.push(format!("SameSite={}", self.same_site.as_str()));
        if let Some(domain) = &self.domain {
            parts.push(format!("Domain={domain}"));
        }
        if let Some(expires) = self.expire_date {
            parts.push(format!("Expires={}", httpdate::fmt_http_date(expires)));
        }
        parts.join("; ")
    }
}

/// Parses a `Cookie:` header value into a flat map: `;`-separated pairs,
/// each `=`-split with both sides trimmed. A malformed pair is a
/// `BadRequest`, matching the source's `split_two`, which strips
/// whitespace on both sides of the split.
pub fn parse_cookie_header(raw: &str) -> Result<HeaderMap, HttpError> {
    let mut map = HeaderMap::new();
    for item in raw.split(';') {
        let mut parts = item.splitn(2, '=');
        let key = parts
            .next()
            .ok_or_else(|| HttpError::bad_request("cookie pair missing '='"))?
            .trim();
        let value = parts
            .next()
            .ok_or_else(|| HttpError::bad_request("cookie pair missing '='"))?
            .trim();
        map.insert(key, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_site_none_requires_secure() {
        let err = Cookie::new(
            "a",
            "b",
            "/",
            None,
            None,
            false,
            false,
            SameSite::None,
            None,
        );
        assert!(err.is_err());
        assert!(Cookie::new("a", "b", "/", None, None, false, true, SameSite::None, None).is_ok());
    }

    #[test]
    fn header_value_omits_default_path_includes_same_site() {
        let c = Cookie::simple("session", "abc123");
        assert_eq!(c.to_header_value(), "session=abc123; SameSite=Lax");
    }

    #[test]
    fn header_value_includes_all_set_attributes_in_order() {
        let mut c = Cookie::simple("s", "v");
        c.path = "/api".to_string();
        c.max_age = Some(3600);
        c.http_only = true;
        c.secure = true;
        c.domain = Some("example.com".to_string());
        assert_eq!(
            c.to_header_value(),
            "s=v; path=/api; max-age=3600; HttpOnly; Secure; SameSite=Lax; Domain=example.com"
        );
    }

    #[test]
    fn parses_multiple_cookie_pairs() {
        let m = parse_cookie_header("a=1; b = 2 ").unwrap();
        assert_eq!(m.get("a"), Some("1"));
        assert_eq!(m.get("b"), Some("2"));
    }
}
