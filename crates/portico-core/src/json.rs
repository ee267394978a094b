//! Key-path lookups on raw JSON bytes.
//!
//! [`peek`] walks a document along a key path without deserializing the
//! values it skips, and returns the raw bytes of the target together with
//! its [`JsonType`]. String targets are returned without their quotes
//! (escape sequences are left as-is). Path segments of the form `[N]`
//! index into arrays.

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::value::RawValue;
use thiserror::Error;

/// Kind of the JSON value found by [`peek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    /// String.
    String,
    /// Number.
    Number,
    /// Object.
    Object,
    /// Array.
    Array,
    /// `true` or `false`.
    Boolean,
    /// `null`.
    Null,
}

/// Errors raised by [`peek`].
#[derive(Debug, Error)]
pub enum PeekError {
    /// There is no body to look into.
    #[error("no body")]
    NoBody,

    /// The path does not exist in the document.
    #[error("key path not found: {0}")]
    NotFound(String),

    /// The document is not valid JSON.
    #[error("malformed json: {0}")]
    Malformed(#[from] serde_json::Error),
}

fn classify(raw: &str) -> JsonType {
    match raw.as_bytes().first() {
        Some(b'"') => JsonType::String,
        Some(b'{') => JsonType::Object,
        Some(b'[') => JsonType::Array,
        Some(b't' | b'f') => JsonType::Boolean,
        Some(b'n') => JsonType::Null,
        _ => JsonType::Number,
    }
}

fn array_index(segment: &str) -> Option<usize> {
    segment.strip_prefix('[')?.strip_suffix(']')?.parse().ok()
}

/// Returns the raw bytes and type of the value at `path` in `body`.
///
/// An empty path returns the whole document.
pub fn peek(body: &Bytes, path: &[&str]) -> Result<(Bytes, JsonType), PeekError> {
    let text = std::str::from_utf8(body).map_err(|e| {
        PeekError::Malformed(serde::de::Error::custom(format!("invalid utf-8: {e}")))
    })?;
    let mut current: &RawValue = serde_json::from_str(text)?;

    for (depth, segment) in path.iter().enumerate() {
        let not_found = || PeekError::NotFound(path[..=depth].join("."));
        let next = match (classify(current.get()), array_index(segment)) {
            (JsonType::Array, Some(index)) => {
                let items: Vec<&RawValue> = serde_json::from_str(current.get())?;
                items.get(index).copied()
            }
            (JsonType::Object, _) => {
                let members: HashMap<String, &RawValue> = serde_json::from_str(current.get())?;
                members.get(*segment).copied()
            }
            _ => None,
        };
        current = next.ok_or_else(not_found)?;
    }

    let raw = current.get();
    let kind = classify(raw);
    let raw = if kind == JsonType::String {
        &raw[1..raw.len() - 1]
    } else {
        raw
    };
    Ok((body.slice_ref(raw.as_bytes()), kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Bytes {
        Bytes::from_static(br#"{"a":{"b":[1,{"c":"x\"y"}],"d":true},"e":null,"f":-1.5e3}"#)
    }

    #[test]
    fn test_peek_nested_values() {
        let body = doc();
        let (raw, kind) = peek(&body, &["a", "b", "[1]", "c"]).unwrap();
        assert_eq!(&raw[..], br#"x\"y"#);
        assert_eq!(kind, JsonType::String);

        let (raw, kind) = peek(&body, &["a", "d"]).unwrap();
        assert_eq!(&raw[..], b"true");
        assert_eq!(kind, JsonType::Boolean);

        let (raw, kind) = peek(&body, &["a", "b"]).unwrap();
        assert_eq!(&raw[..], br#"[1,{"c":"x\"y"}]"#);
        assert_eq!(kind, JsonType::Array);

        assert_eq!(peek(&body, &["e"]).unwrap().1, JsonType::Null);
        let (raw, kind) = peek(&body, &["f"]).unwrap();
        assert_eq!(&raw[..], b"-1.5e3");
        assert_eq!(kind, JsonType::Number);
    }

    #[test]
    fn test_peek_empty_path_is_document() {
        let body = doc();
        let (raw, kind) = peek(&body, &[]).unwrap();
        assert_eq!(raw, body);
        assert_eq!(kind, JsonType::Object);
    }

    #[test]
    fn test_peek_missing_path() {
        let body = doc();
        let err = peek(&body, &["a", "zz", "q"]).unwrap_err();
        assert_eq!(err.to_string(), "key path not found: a.zz");
        assert!(matches!(peek(&body, &["a", "b", "[9]"]), Err(PeekError::NotFound(_))));
        assert!(matches!(peek(&body, &["e", "x"]), Err(PeekError::NotFound(_))));
    }

    #[test]
    fn test_peek_malformed() {
        let body = Bytes::from_static(b"{not json");
        assert!(matches!(peek(&body, &["a"]), Err(PeekError::Malformed(_))));
    }

    #[test]
    fn test_peek_matches_direct_serialization() {
        #[derive(serde::Serialize)]
        struct Inner {
            id: u32,
            tags: Vec<&'static str>,
        }
        #[derive(serde::Serialize)]
        struct Outer {
            inner: Inner,
        }
        let obj = Outer {
            inner: Inner {
                id: 9,
                tags: vec!["a", "b"],
            },
        };
        let body = Bytes::from(serde_json::to_vec(&obj).unwrap());
        let direct = serde_json::to_vec(&obj.inner).unwrap();
        let (raw, _) = peek(&body, &["inner"]).unwrap();
        assert_eq!(&raw[..], &direct[..]);
    }
}
