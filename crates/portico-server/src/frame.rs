//! Channel-protocol framing.
//!
//! Every frame starts with a fixed header, all integers big-endian:
//!
//! ```text
//! size:u32  type:u8  id:u32  payload...
//! ```
//!
//! `size` counts the whole frame including itself. Payloads by type:
//!
//! | Type | Payload |
//! |------|---------|
//! | `0x03` call | `ttl_ms:u32` `method:u16-string` `arg2:u32-bytes` `arg3:u32-bytes` |
//! | `0x04` response | `flags:u8` `arg2:u32-bytes` `arg3:u32-bytes` |
//! | `0xff` system error | `code:u8` `message:u16-string` |
//!
//! Arg2 holds the header block and arg3 the encoded struct; see
//! [`portico_core::wire`]. Bit `0x01` of a response's flags marks an
//! application error.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use portico_core::{SystemError, SystemErrorCode};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Length of the fixed frame header.
pub const FRAME_HEADER_LEN: usize = 9;

/// Default upper bound on a frame, header included.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const TYPE_CALL: u8 = 0x03;
const TYPE_RESPONSE: u8 = 0x04;
const TYPE_ERROR: u8 = 0xff;

const FLAG_APP_ERROR: u8 = 0x01;

/// Errors raised while reading or writing frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The connection failed.
    #[error("frame I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A frame exceeds the configured maximum.
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Declared or encoded size.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// A frame declares a size smaller than its header.
    #[error("frame size {0} is smaller than the frame header")]
    TooSmall(usize),

    /// Unknown frame type.
    #[error("unknown frame type {0:#04x}")]
    UnknownType(u8),

    /// The payload ended early.
    #[error("truncated {0} frame")]
    Truncated(&'static str),

    /// The payload had bytes left over.
    #[error("found unexpected bytes after {0} frame")]
    TrailingBytes(&'static str),

    /// A string field was not UTF-8.
    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    /// A field is too long for its length prefix.
    #[error("{field} of {len} bytes does not fit its length prefix")]
    FieldTooLong {
        /// Field name.
        field: &'static str,
        /// Field length.
        len: usize,
    },
}

/// Result type alias using [`FrameError`].
pub type FrameResult<T> = Result<T, FrameError>;

/// An inbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFrame {
    /// Frame id, echoed by the reply.
    pub id: u32,
    /// `Service::method`.
    pub method: String,
    /// Time the caller is willing to wait; zero means no deadline.
    pub ttl: Duration,
    /// Encoded header block.
    pub arg2: Bytes,
    /// Encoded body.
    pub arg3: Bytes,
}

/// A call response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Id of the call being answered.
    pub id: u32,
    /// The body is an application error.
    pub app_error: bool,
    /// Encoded response headers.
    pub arg2: Bytes,
    /// Encoded response body.
    pub arg3: Bytes,
}

/// A system error answering a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFrame {
    /// Id of the call being answered; zero for connection-level errors.
    pub id: u32,
    /// Error code.
    pub code: SystemErrorCode,
    /// Error message.
    pub message: String,
}

impl ErrorFrame {
    /// Creates an error frame.
    #[must_use]
    pub fn new(id: u32, code: SystemErrorCode, message: impl Into<String>) -> Self {
        Self {
            id,
            code,
            message: message.into(),
        }
    }

    /// Converts into the error surfaced to callers.
    #[must_use]
    pub fn into_system_error(self) -> SystemError {
        SystemError::new(self.code, self.message)
    }
}

/// One channel-protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A call request.
    Call(CallFrame),
    /// A call response.
    Response(ResponseFrame),
    /// A system error.
    Error(ErrorFrame),
}

impl Frame {
    /// Returns the frame id.
    #[must_use]
    pub fn id(&self) -> u32 {
        match self {
            Self::Call(f) => f.id,
            Self::Response(f) => f.id,
            Self::Error(f) => f.id,
        }
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> FrameResult<()> {
        let start = buf.len();
        buf.put_u32(0);
        match self {
            Self::Call(call) => {
                buf.put_u8(TYPE_CALL);
                buf.put_u32(call.id);
                let ttl = u32::try_from(call.ttl.as_millis()).unwrap_or(u32::MAX);
                buf.put_u32(ttl);
                put_short_string(buf, "method", &call.method)?;
                put_long_bytes(buf, "arg2", &call.arg2)?;
                put_long_bytes(buf, "arg3", &call.arg3)?;
            }
            Self::Response(res) => {
                buf.put_u8(TYPE_RESPONSE);
                buf.put_u32(res.id);
                buf.put_u8(if res.app_error { FLAG_APP_ERROR } else { 0 });
                put_long_bytes(buf, "arg2", &res.arg2)?;
                put_long_bytes(buf, "arg3", &res.arg3)?;
            }
            Self::Error(err) => {
                buf.put_u8(TYPE_ERROR);
                buf.put_u32(err.id);
                buf.put_u8(err.code as u8);
                put_short_string(buf, "message", &err.message)?;
            }
        }
        let size = buf.len() - start;
        let declared = u32::try_from(size).map_err(|_| FrameError::FieldTooLong {
            field: "frame",
            len: size,
        })?;
        buf[start..start + 4].copy_from_slice(&declared.to_be_bytes());
        Ok(())
    }

    /// Decodes one complete frame, header included.
    pub fn decode(mut frame: &[u8]) -> FrameResult<Self> {
        if frame.len() < FRAME_HEADER_LEN {
            return Err(FrameError::TooSmall(frame.len()));
        }
        let size = frame.get_u32() as usize;
        if size != frame.len() + 4 {
            return Err(FrameError::Truncated("declared"));
        }
        let ty = frame.get_u8();
        let id = frame.get_u32();

        let decoded = match ty {
            TYPE_CALL => {
                need(&frame, 4, "call")?;
                let ttl = Duration::from_millis(u64::from(frame.get_u32()));
                let method = get_short_string(&mut frame, "call", "method")?;
                let arg2 = get_long_bytes(&mut frame, "call")?;
                let arg3 = get_long_bytes(&mut frame, "call")?;
                ensure_consumed(&frame, "call")?;
                Self::Call(CallFrame {
                    id,
                    method,
                    ttl,
                    arg2,
                    arg3,
                })
            }
            TYPE_RESPONSE => {
                need(&frame, 1, "response")?;
                let flags = frame.get_u8();
                let arg2 = get_long_bytes(&mut frame, "response")?;
                let arg3 = get_long_bytes(&mut frame, "response")?;
                ensure_consumed(&frame, "response")?;
                Self::Response(ResponseFrame {
                    id,
                    app_error: flags & FLAG_APP_ERROR != 0,
                    arg2,
                    arg3,
                })
            }
            TYPE_ERROR => {
                need(&frame, 1, "error")?;
                let code = SystemErrorCode::from_u8(frame.get_u8());
                let message = get_short_string(&mut frame, "error", "message")?;
                ensure_consumed(&frame, "error")?;
                Self::Error(ErrorFrame { id, code, message })
            }
            other => return Err(FrameError::UnknownType(other)),
        };
        Ok(decoded)
    }
}

fn need(buf: &[u8], n: usize, kind: &'static str) -> FrameResult<()> {
    if buf.len() < n {
        return Err(FrameError::Truncated(kind));
    }
    Ok(())
}

fn ensure_consumed(buf: &[u8], kind: &'static str) -> FrameResult<()> {
    if !buf.is_empty() {
        return Err(FrameError::TrailingBytes(kind));
    }
    Ok(())
}

fn put_short_string(buf: &mut BytesMut, field: &'static str, s: &str) -> FrameResult<()> {
    let len = u16::try_from(s.len()).map_err(|_| FrameError::FieldTooLong { field, len: s.len() })?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn put_long_bytes(buf: &mut BytesMut, field: &'static str, bytes: &[u8]) -> FrameResult<()> {
    let len = u32::try_from(bytes.len()).map_err(|_| FrameError::FieldTooLong {
        field,
        len: bytes.len(),
    })?;
    buf.put_u32(len);
    buf.put_slice(bytes);
    Ok(())
}

fn get_short_string(buf: &mut &[u8], kind: &'static str, field: &'static str) -> FrameResult<String> {
    need(buf, 2, kind)?;
    let len = usize::from(buf.get_u16());
    need(buf, len, kind)?;
    let s = std::str::from_utf8(&buf[..len])
        .map_err(|_| FrameError::InvalidUtf8(field))?
        .to_string();
    buf.advance(len);
    Ok(s)
}

fn get_long_bytes(buf: &mut &[u8], kind: &'static str) -> FrameResult<Bytes> {
    need(buf, 4, kind)?;
    let len = buf.get_u32() as usize;
    need(buf, len, kind)?;
    Ok(buf.copy_to_bytes(len))
}

/// Reads one frame into `buf` and decodes it.
///
/// Returns `Ok(None)` when the peer closed the connection between frames.
pub async fn read_frame<R>(reader: &mut R, buf: &mut BytesMut, max_size: usize) -> FrameResult<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let size = match reader.read_u32().await {
        Ok(size) => size as usize,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if size < FRAME_HEADER_LEN {
        return Err(FrameError::TooSmall(size));
    }
    if size > max_size {
        return Err(FrameError::TooLarge { size, max: max_size });
    }

    buf.clear();
    buf.put_u32(size as u32);
    buf.resize(size, 0);
    reader.read_exact(&mut buf[4..]).await?;
    Frame::decode(&buf[..]).map(Some)
}

/// Encodes `frame` into `buf` and writes it.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame, buf: &mut BytesMut, max_size: usize) -> FrameResult<()>
where
    W: AsyncWrite + Unpin,
{
    buf.clear();
    frame.encode(buf)?;
    if buf.len() > max_size {
        return Err(FrameError::TooLarge {
            size: buf.len(),
            max: max_size,
        });
    }
    writer.write_all(buf).await?;
    writer.flush().await?;
    Ok(())
}
