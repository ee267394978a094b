//! Binary payload encoding for the channel protocol.
//!
//! Arg3 payloads use the binary struct encoding: a struct is a sequence of
//! `(type: u8, id: i16, value)` fields closed by a zero byte, all integers
//! big-endian, strings and binaries as `i32` length plus bytes. Endpoints
//! own their schemas and convert through [`ToWire`] and [`FromWire`]; the
//! framework only moves [`Value`] trees.
//!
//! Arg2 carries a header block: `u16` count, then for each header a
//! `u16`-length key and a `u16`-length value.
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use portico_core::wire::{self, FieldValue, Value};
//!
//! let value = Value::Struct(vec![
//!     FieldValue::new(1, Value::string("hello")),
//!     FieldValue::new(2, Value::I32(7)),
//! ]);
//!
//! let mut buf = BytesMut::new();
//! value.encode(&mut buf);
//! let decoded = wire::decode_struct(&mut buf.freeze()).unwrap();
//! assert_eq!(decoded.field(1).and_then(Value::as_str), Some("hello"));
//! ```

use bytes::{Buf, BufMut, Bytes};
use indexmap::IndexMap;
use thiserror::Error;

/// Deepest nesting accepted by the decoder.
pub const MAX_DEPTH: usize = 64;

/// Errors raised while encoding or decoding payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The input ended before the value was complete.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// An unknown type id was found.
    #[error("unknown type id {0}")]
    UnknownType(u8),

    /// A negative collection or binary length was found.
    #[error("negative length {0}")]
    NegativeLength(i32),

    /// Nesting exceeded [`MAX_DEPTH`].
    #[error("value nested deeper than {MAX_DEPTH} levels")]
    TooDeep,

    /// A header key or value was not UTF-8.
    #[error("header is not valid UTF-8")]
    InvalidUtf8,

    /// A header key or value exceeds 65535 bytes.
    #[error("header field of {0} bytes exceeds the 65535 byte limit")]
    TooLong(usize),

    /// Bytes were left after a complete read.
    #[error("found unexpected bytes after {0}")]
    TrailingBytes(String),

    /// A typed value could not be converted.
    #[error("{0}")]
    Conversion(String),
}

impl WireError {
    /// Creates a conversion error.
    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion(msg.into())
    }
}

/// Result type alias using [`WireError`].
pub type WireResult<T> = Result<T, WireError>;

/// Type ids of the binary encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Type {
    /// Boolean.
    Bool = 2,
    /// Signed byte.
    I8 = 3,
    /// 64-bit float.
    Double = 4,
    /// 16-bit integer.
    I16 = 6,
    /// 32-bit integer.
    I32 = 8,
    /// 64-bit integer.
    I64 = 10,
    /// Bytes or string.
    Binary = 11,
    /// Struct.
    Struct = 12,
    /// Map.
    Map = 13,
    /// Set.
    Set = 14,
    /// List.
    List = 15,
}

const STOP: u8 = 0;

impl TryFrom<u8> for Type {
    type Error = WireError;

    fn try_from(id: u8) -> WireResult<Self> {
        Ok(match id {
            2 => Self::Bool,
            3 => Self::I8,
            4 => Self::Double,
            6 => Self::I16,
            8 => Self::I32,
            10 => Self::I64,
            11 => Self::Binary,
            12 => Self::Struct,
            13 => Self::Map,
            14 => Self::Set,
            15 => Self::List,
            other => return Err(WireError::UnknownType(other)),
        })
    }
}

/// A struct field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    /// Field id.
    pub id: i16,
    /// Field value.
    pub value: Value,
}

impl FieldValue {
    /// Creates a field.
    #[must_use]
    pub fn new(id: i16, value: Value) -> Self {
        Self { id, value }
    }
}

/// A decoded payload value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// Signed byte.
    I8(i8),
    /// 64-bit float.
    Double(f64),
    /// 16-bit integer.
    I16(i16),
    /// 32-bit integer.
    I32(i32),
    /// 64-bit integer.
    I64(i64),
    /// Bytes or string.
    Binary(Bytes),
    /// Struct.
    Struct(Vec<FieldValue>),
    /// Map.
    Map {
        /// Key type.
        key_type: Type,
        /// Value type.
        value_type: Type,
        /// Entries in wire order.
        entries: Vec<(Value, Value)>,
    },
    /// Set.
    Set {
        /// Element type.
        elem_type: Type,
        /// Elements in wire order.
        items: Vec<Value>,
    },
    /// List.
    List {
        /// Element type.
        elem_type: Type,
        /// Elements.
        items: Vec<Value>,
    },
}

impl Value {
    /// Creates a binary value from a string.
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::Binary(Bytes::from(s.into()))
    }

    /// Returns the type id.
    #[must_use]
    pub fn ty(&self) -> Type {
        match self {
            Self::Bool(_) => Type::Bool,
            Self::I8(_) => Type::I8,
            Self::Double(_) => Type::Double,
            Self::I16(_) => Type::I16,
            Self::I32(_) => Type::I32,
            Self::I64(_) => Type::I64,
            Self::Binary(_) => Type::Binary,
            Self::Struct(_) => Type::Struct,
            Self::Map { .. } => Type::Map,
            Self::Set { .. } => Type::Set,
            Self::List { .. } => Type::List,
        }
    }

    /// Returns the UTF-8 content of a binary value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Binary(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Returns the field `id` of a struct value.
    #[must_use]
    pub fn field(&self, id: i16) -> Option<&Value> {
        match self {
            Self::Struct(fields) => fields.iter().find(|f| f.id == id).map(|f| &f.value),
            _ => None,
        }
    }

    /// Appends the encoding of this value to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        match self {
            Self::Bool(v) => buf.put_u8(u8::from(*v)),
            Self::I8(v) => buf.put_i8(*v),
            Self::Double(v) => buf.put_f64(*v),
            Self::I16(v) => buf.put_i16(*v),
            Self::I32(v) => buf.put_i32(*v),
            Self::I64(v) => buf.put_i64(*v),
            Self::Binary(b) => {
                put_len(buf, b.len());
                buf.put_slice(b);
            }
            Self::Struct(fields) => {
                for field in fields {
                    buf.put_u8(field.value.ty() as u8);
                    buf.put_i16(field.id);
                    field.value.encode(buf);
                }
                buf.put_u8(STOP);
            }
            Self::Map {
                key_type,
                value_type,
                entries,
            } => {
                buf.put_u8(*key_type as u8);
                buf.put_u8(*value_type as u8);
                put_len(buf, entries.len());
                for (k, v) in entries {
                    k.encode(buf);
                    v.encode(buf);
                }
            }
            Self::Set { elem_type, items } | Self::List { elem_type, items } => {
                buf.put_u8(*elem_type as u8);
                put_len(buf, items.len());
                for item in items {
                    item.encode(buf);
                }
            }
        }
    }
}

fn put_len(buf: &mut impl BufMut, len: usize) {
    buf.put_i32(i32::try_from(len).unwrap_or(i32::MAX));
}

fn need(buf: &impl Buf, n: usize) -> WireResult<()> {
    if buf.remaining() < n {
        Err(WireError::UnexpectedEof)
    } else {
        Ok(())
    }
}

fn get_len(buf: &mut impl Buf) -> WireResult<usize> {
    need(buf, 4)?;
    let len = buf.get_i32();
    usize::try_from(len).map_err(|_| WireError::NegativeLength(len))
}

/// Decodes a top-level struct.
pub fn decode_struct(buf: &mut impl Buf) -> WireResult<Value> {
    decode_value(Type::Struct, buf, 0)
}

/// Decodes one value of type `ty`.
pub fn decode_value(ty: Type, buf: &mut impl Buf, depth: usize) -> WireResult<Value> {
    if depth > MAX_DEPTH {
        return Err(WireError::TooDeep);
    }
    Ok(match ty {
        Type::Bool => {
            need(buf, 1)?;
            Value::Bool(buf.get_u8() != 0)
        }
        Type::I8 => {
            need(buf, 1)?;
            Value::I8(buf.get_i8())
        }
        Type::Double => {
            need(buf, 8)?;
            Value::Double(buf.get_f64())
        }
        Type::I16 => {
            need(buf, 2)?;
            Value::I16(buf.get_i16())
        }
        Type::I32 => {
            need(buf, 4)?;
            Value::I32(buf.get_i32())
        }
        Type::I64 => {
            need(buf, 8)?;
            Value::I64(buf.get_i64())
        }
        Type::Binary => {
            let len = get_len(buf)?;
            need(buf, len)?;
            Value::Binary(buf.copy_to_bytes(len))
        }
        Type::Struct => {
            let mut fields = Vec::new();
            loop {
                need(buf, 1)?;
                let id = buf.get_u8();
                if id == STOP {
                    break;
                }
                let field_type = Type::try_from(id)?;
                need(buf, 2)?;
                let field_id = buf.get_i16();
                let value = decode_value(field_type, buf, depth + 1)?;
                fields.push(FieldValue::new(field_id, value));
            }
            Value::Struct(fields)
        }
        Type::Map => {
            need(buf, 2)?;
            let key_type = Type::try_from(buf.get_u8())?;
            let value_type = Type::try_from(buf.get_u8())?;
            let len = get_len(buf)?;
            let mut entries = Vec::with_capacity(len.min(buf.remaining()));
            for _ in 0..len {
                let k = decode_value(key_type, buf, depth + 1)?;
                let v = decode_value(value_type, buf, depth + 1)?;
                entries.push((k, v));
            }
            Value::Map {
                key_type,
                value_type,
                entries,
            }
        }
        Type::Set | Type::List => {
            need(buf, 1)?;
            let elem_type = Type::try_from(buf.get_u8())?;
            let len = get_len(buf)?;
            let mut items = Vec::with_capacity(len.min(buf.remaining()));
            for _ in 0..len {
                items.push(decode_value(elem_type, buf, depth + 1)?);
            }
            if ty == Type::Set {
                Value::Set { elem_type, items }
            } else {
                Value::List { elem_type, items }
            }
        }
    })
}

/// Converts a typed value into a payload.
pub trait ToWire {
    /// Builds the payload. Fails when the value cannot be represented,
    /// for example when a required field is unset.
    fn to_wire(&self) -> WireResult<Value>;
}

/// Builds a typed value from a payload.
pub trait FromWire: Sized {
    /// Converts the payload.
    fn from_wire(value: Value) -> WireResult<Self>;
}

impl ToWire for Value {
    fn to_wire(&self) -> WireResult<Value> {
        Ok(self.clone())
    }
}

impl FromWire for Value {
    fn from_wire(value: Value) -> WireResult<Self> {
        Ok(value)
    }
}

/// Writes an arg2 header block.
pub fn write_headers(buf: &mut impl BufMut, headers: &IndexMap<String, String>) -> WireResult<()> {
    let count = u16::try_from(headers.len()).map_err(|_| WireError::TooLong(headers.len()))?;
    buf.put_u16(count);
    for (key, value) in headers {
        put_short_string(buf, key)?;
        put_short_string(buf, value)?;
    }
    Ok(())
}

fn put_short_string(buf: &mut impl BufMut, s: &str) -> WireResult<()> {
    let len = u16::try_from(s.len()).map_err(|_| WireError::TooLong(s.len()))?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn get_short_string(buf: &mut impl Buf) -> WireResult<String> {
    need(buf, 2)?;
    let len = usize::from(buf.get_u16());
    need(buf, len)?;
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
}

/// Reads an arg2 header block. An empty input is an empty block.
pub fn read_headers(buf: &mut impl Buf) -> WireResult<IndexMap<String, String>> {
    if !buf.has_remaining() {
        return Ok(IndexMap::new());
    }
    need(buf, 2)?;
    let count = usize::from(buf.get_u16());
    let mut headers = IndexMap::with_capacity(count.min(buf.remaining()));
    for _ in 0..count {
        let key = get_short_string(buf)?;
        let value = get_short_string(buf)?;
        headers.insert(key, value);
    }
    Ok(headers)
}

/// Fails if `buf` has bytes left after `stage`.
pub fn ensure_empty(buf: &impl Buf, stage: &str) -> WireResult<()> {
    if buf.has_remaining() {
        return Err(WireError::TrailingBytes(stage.to_string()));
    }
    Ok(())
}
