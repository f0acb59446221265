//! Query-string parsing: `key=value&key=value` pairs from the part of
//! the request target after `?`.
//!
//! Grounded on `original_source/mhttp/socket_wrapper.py::split_two` and
//! its use in `ServerSocketWrapper.get_request` (`dict(split_two(item,
//! '=') for item in x[1].split("&"))`): each `&`-separated item must
//! split into exactly one `=`-pair or the whole request is `BadRequest`.
//! No percent-decoding is performed, matching the source.

use crate::errors::HttpError;
use crate::http::types::HeaderMap;

/// Parses a query string (without the leading `?`) into a flat map.
/// A bare key with no `=` is a `BadRequest`, matching the source's
/// strict two-way split.
pub fn parse_query(raw: &str) -> Result<HeaderMap, HttpError> {
    let mut map = HeaderMap::new();
    if raw.is_empty() {
        return Ok(map);
    }
    for item in raw.split('&') {
        let mut parts = item.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let value = parts
            .next()
            .ok_or_else(|| HttpError::bad_request("query argument missing '='"))?;
        map.insert(key.trim(), value.trim());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_pairs() {
        let q = parse_query("a=1&b=2").unwrap();
        assert_eq!(q.get("a"), Some("1"));
        assert_eq!(q.get("b"), Some("2"));
    }

    #[test]
    fn empty_string_is_empty_map() {
        let q = parse_query("").unwrap();
        assert!(q.is_empty());
    }

    #[test]
    fn bare_key_without_equals_is_bad_request() {
        assert!(parse_query("a=1&b").is_err());
    }

    #[test]
    fn value_containing_equals_is_kept_whole() {
        let q = parse_query("a=1=2").unwrap();
        assert_eq!(q.get("a"), Some("1=2"));
    }
}
