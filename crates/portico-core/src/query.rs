//! Strict query string parsing and typed query values.

use std::fmt;

use indexmap::IndexMap;
use thiserror::Error;

/// Parsed query: key to every value, in order of first appearance.
pub type QueryValues = IndexMap<String, Vec<String>>;

/// A malformed query string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryParseError {
    /// A `%` not followed by two hex digits.
    #[error("invalid URL escape {0:?}")]
    InvalidEscape(String),

    /// A `;` used as a separator.
    #[error("invalid semicolon separator in query")]
    Semicolon,
}

fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn unescape(s: &str) -> Result<String, QueryParseError> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let decoded = bytes
                    .get(i + 1)
                    .and_then(|&h| hex(h))
                    .zip(bytes.get(i + 2).and_then(|&l| hex(l)));
                match decoded {
                    Some((h, l)) => out.push((h << 4) | l),
                    None => {
                        let end = (i + 3).min(bytes.len());
                        let escape = String::from_utf8_lossy(&bytes[i..end]).into_owned();
                        return Err(QueryParseError::InvalidEscape(escape));
                    }
                }
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Parses a raw query string.
///
/// Pairs are separated by `&`; a pair without `=` has an empty value.
/// `+` decodes to a space. Every `%` must start a two-digit hex escape and
/// `;` is rejected.
pub fn parse_query(raw: &str) -> Result<QueryValues, QueryParseError> {
    let mut values = QueryValues::new();
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        if pair.contains(';') {
            return Err(QueryParseError::Semicolon);
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        values
            .entry(unescape(key)?)
            .or_default()
            .push(unescape(value)?);
    }
    Ok(values)
}

/// Scalar types readable from a query value.
pub trait QueryValue: Sized {
    /// Type name used in logs.
    const EXPECTED: &'static str;

    /// Converts one raw value.
    fn parse_value(raw: &str) -> Result<Self, String>;
}

impl QueryValue for String {
    const EXPECTED: &'static str = "string";

    fn parse_value(raw: &str) -> Result<Self, String> {
        Ok(raw.to_string())
    }
}

impl QueryValue for bool {
    const EXPECTED: &'static str = "bool";

    fn parse_value(raw: &str) -> Result<Self, String> {
        match raw {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(format!("invalid bool {other:?}")),
        }
    }
}

macro_rules! query_value_from_str {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl QueryValue for $ty {
                const EXPECTED: &'static str = $name;

                fn parse_value(raw: &str) -> Result<Self, String> {
                    raw.parse::<$ty>().map_err(|e| format_parse_error(raw, &e))
                }
            }
        )*
    };
}

fn format_parse_error(raw: &str, err: &dyn fmt::Display) -> String {
    format!("parsing {raw:?}: {err}")
}

query_value_from_str! {
    i8 => "int8",
    i16 => "int16",
    i32 => "int32",
    i64 => "int64",
    f64 => "float64",
}
