//! JSON codec: a thin `serde_json` wrapper with a depth-limited
//! deserialization pass.
//!
//! Grounded on `original_source/utils/myjson.py` (`serialize_JSON`,
//! `deserialize_JSON`). `serde_json` already guards against
//! pathological input in ways the source's `json` module doesn't, so
//! the only behavior this module adds on top is the depth cap.

use crate::errors::HttpError;
use serde::de::DeserializeOwned;

/// Nesting depth beyond which a JSON document is rejected (spec §6).
pub const MAX_DEPTH: usize = 32;

/// Deserializes `src` into `T`, first checking that no array/object
/// nests deeper than [`MAX_DEPTH`]. `serde_json::Value` is parsed once
/// to do the depth check, then `T` is deserialized from the same bytes.
pub fn from_slice<T: DeserializeOwned>(src: &[u8]) -> Result<T, HttpError> {
    let value: serde_json::Value =
        serde_json::from_slice(src).map_err(|e| HttpError::bad_request(format!("invalid JSON: {e}")))?;
    check_depth(&value, 0)?;
    serde_json::from_value(value).map_err(|e| HttpError::bad_request(format!("invalid JSON shape: {e}")))
}

pub fn to_string<T: serde::Serialize>(value: &T) -> Result<String, HttpError> {
    serde_json::to_string(value).map_err(|e| HttpError::internal(format!("failed to serialize JSON: {e}")))
}

fn check_depth(value: &serde_json::Value, depth: usize) -> Result<(), HttpError> {
    if depth > MAX_DEPTH {
        return Err(HttpError::bad_request(format!(
            "JSON nesting exceeds max depth of {MAX_DEPTH}"
        )));
    }
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                check_depth(item, depth + 1)?;
            }
        }
        serde_json::Value::Object(map) => {
            for v in map.values() {
                check_depth(v, depth + 1)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, PartialEq, Debug)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn round_trips_a_simple_struct() {
        let point: Point = from_slice(br#"{"x": 1, "y": 2}"#).unwrap();
        assert_eq!(point, Point { x: 1, y: 2 });
    }

    #[test]
    fn rejects_excessively_nested_documents() {
        let mut src = String::new();
        for _ in 0..(MAX_DEPTH + 5) {
            src.push('[');
        }
        src.push('1');
        for _ in 0..(MAX_DEPTH + 5) {
            src.push(']');
        }
        let result: Result<serde_json::Value, _> = from_slice(src.as_bytes());
        assert!(result.is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        let result: Result<serde_json::Value, _> = from_slice(b"{not json}");
        assert!(result.is_err());
    }
}
