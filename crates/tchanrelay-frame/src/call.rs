//! Payload layouts the relay needs to understand.
//!
//! The relay is transparent: it never re-encodes a call's payload. It reads
//! the service name of a call request, the fragment flag of call frames, and
//! builds its own error and init frames. Layouts (big-endian, `~N` is an
//! N-byte length prefix):
//!
//! ```text
//! call req:      flags:1 ttl:4 tracing:25 service~1 nh:1 (k~1 v~1){nh} csumtype:1 arg~2*
//! call res:      flags:1 code:1 tracing:25 nh:1 (k~1 v~1){nh} csumtype:1 arg~2*
//! continuation:  flags:1 csumtype:1 arg~2*
//! error:         code:1 tracing:25 message~2
//! init req/res:  version:2 nh:2 (k~2 v~2){nh}
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{Frame, HEADER_SIZE, MAX_FRAME_SIZE};
use crate::error::{FrameError, Result};
use crate::message::MessageType;

/// Flag bit set on call frames when more fragments of the same message follow.
pub const CALL_FLAG_MORE_FRAGMENTS: u8 = 0x01;

/// Size of the opaque tracing block in call and error payloads.
pub const TRACING_SIZE: usize = 25;

/// Protocol version carried in init frames.
pub const INIT_VERSION: u16 = 2;

/// Init header naming the sender's externally reachable `host:port`.
pub const INIT_HOST_PORT: &str = "host_port";

/// Init header naming the sender process.
pub const INIT_PROCESS_NAME: &str = "process_name";

const CHECKSUM_NONE: u8 = 0x00;
const SERVICE_OFFSET: usize = 1 + 4 + TRACING_SIZE;
const MAX_ERROR_MESSAGE: usize = 1024;

impl Frame {
    /// Flags byte of call frames; `None` for other types or an empty payload.
    pub fn flags(&self) -> Option<u8> {
        if !self.message_type().has_flags() {
            return None;
        }
        self.payload.first().copied()
    }

    /// Returns true if more fragments of this message follow.
    pub fn more_fragments(&self) -> bool {
        self.flags()
            .is_some_and(|flags| flags & CALL_FLAG_MORE_FRAGMENTS != 0)
    }

    /// Target service of a call request.
    pub fn service(&self) -> Result<&str> {
        let kind = self.message_type();
        if kind != MessageType::CallReq {
            return Err(FrameError::Malformed {
                kind,
                reason: "frame carries no service",
            });
        }

        let len = *self.payload.get(SERVICE_OFFSET).ok_or(FrameError::Malformed {
            kind,
            reason: "truncated before service",
        })? as usize;
        let start = SERVICE_OFFSET + 1;
        let raw = self
            .payload
            .get(start..start + len)
            .ok_or(FrameError::Malformed {
                kind,
                reason: "truncated service name",
            })?;

        std::str::from_utf8(raw).map_err(|_| FrameError::Malformed {
            kind,
            reason: "service name is not utf-8",
        })
    }

    /// Build a call-scoped error frame.
    pub fn error(id: u32, code: ErrorCode, message: &str) -> Self {
        ErrorPayload::new(code, message).into_frame(id)
    }

    /// Build a continuation frame carrying one chunk.
    pub fn continuation(
        message_type: MessageType,
        id: u32,
        more_fragments: bool,
        chunk: &[u8],
    ) -> Result<Self> {
        let mut buf = BytesMut::with_capacity(4 + chunk.len());
        buf.put_u8(if more_fragments {
            CALL_FLAG_MORE_FRAGMENTS
        } else {
            0
        });
        buf.put_u8(CHECKSUM_NONE);
        put_str2(&mut buf, chunk, message_type)?;
        finish(message_type, id, buf)
    }
}

/// Error codes of the error frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Timeout,
    Cancelled,
    Busy,
    Declined,
    UnexpectedError,
    BadRequest,
    NetworkError,
    Unhealthy,
    ProtocolError,
}

impl ErrorCode {
    pub fn as_u8(self) -> u8 {
        match self {
            ErrorCode::Timeout => 0x01,
            ErrorCode::Cancelled => 0x02,
            ErrorCode::Busy => 0x03,
            ErrorCode::Declined => 0x04,
            ErrorCode::UnexpectedError => 0x05,
            ErrorCode::BadRequest => 0x06,
            ErrorCode::NetworkError => 0x07,
            ErrorCode::Unhealthy => 0x08,
            ErrorCode::ProtocolError => 0xff,
        }
    }

    /// Unknown codes map to `UnexpectedError`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => ErrorCode::Timeout,
            0x02 => ErrorCode::Cancelled,
            0x03 => ErrorCode::Busy,
            0x04 => ErrorCode::Declined,
            0x06 => ErrorCode::BadRequest,
            0x07 => ErrorCode::NetworkError,
            0x08 => ErrorCode::Unhealthy,
            0xff => ErrorCode::ProtocolError,
            _ => ErrorCode::UnexpectedError,
        }
    }
}

/// Decoded error frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorPayload {
    /// Messages longer than 1 KiB are truncated on a char boundary.
    pub fn new(code: ErrorCode, message: &str) -> Self {
        let mut end = message.len().min(MAX_ERROR_MESSAGE);
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            code,
            message: message[..end].to_string(),
        }
    }

    pub fn into_frame(self, id: u32) -> Frame {
        let mut buf = BytesMut::with_capacity(1 + TRACING_SIZE + 2 + self.message.len());
        buf.put_u8(self.code.as_u8());
        buf.put_bytes(0, TRACING_SIZE);
        buf.put_u16(self.message.len() as u16);
        buf.put_slice(self.message.as_bytes());
        Frame::new(MessageType::Error, id, buf.freeze())
    }

    pub fn parse(frame: &Frame) -> Result<Self> {
        let kind = frame.message_type();
        if kind != MessageType::Error {
            return Err(FrameError::Malformed {
                kind,
                reason: "not an error frame",
            });
        }
        let mut src = frame.payload.as_ref();
        if src.remaining() < 1 + TRACING_SIZE {
            return Err(FrameError::Malformed {
                kind,
                reason: "truncated error header",
            });
        }
        let code = ErrorCode::from_u8(src.get_u8());
        src.advance(TRACING_SIZE);
        let message = get_string2(&mut src, kind)?;
        Ok(Self { code, message })
    }
}

/// A call request as built by clients and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub more_fragments: bool,
    pub ttl_ms: u32,
    pub service: String,
    pub headers: Vec<(String, String)>,
    pub args: Vec<Bytes>,
}

impl CallRequest {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            more_fragments: false,
            ttl_ms: 1000,
            service: service.into(),
            headers: Vec::new(),
            args: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn with_arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a transport header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn into_frame(self, id: u32) -> Result<Frame> {
        let kind = MessageType::CallReq;
        let mut buf = BytesMut::new();
        buf.put_u8(if self.more_fragments {
            CALL_FLAG_MORE_FRAGMENTS
        } else {
            0
        });
        buf.put_u32(self.ttl_ms);
        buf.put_bytes(0, TRACING_SIZE);
        put_str1(&mut buf, self.service.as_bytes(), kind)?;
        put_headers1(&mut buf, &self.headers, kind)?;
        buf.put_u8(CHECKSUM_NONE);
        for arg in &self.args {
            put_str2(&mut buf, arg, kind)?;
        }
        finish(kind, id, buf)
    }
}

/// A call response as built by services and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResponse {
    pub more_fragments: bool,
    /// Zero for success, non-zero for an application error.
    pub code: u8,
    pub headers: Vec<(String, String)>,
    pub args: Vec<Bytes>,
}

impl CallResponse {
    pub fn ok() -> Self {
        Self {
            more_fragments: false,
            code: 0,
            headers: Vec::new(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Mark that more response fragments follow.
    pub fn fragmented(mut self) -> Self {
        self.more_fragments = true;
        self
    }

    pub fn into_frame(self, id: u32) -> Result<Frame> {
        let kind = MessageType::CallRes;
        let mut buf = BytesMut::new();
        buf.put_u8(if self.more_fragments {
            CALL_FLAG_MORE_FRAGMENTS
        } else {
            0
        });
        buf.put_u8(self.code);
        buf.put_bytes(0, TRACING_SIZE);
        put_headers1(&mut buf, &self.headers, kind)?;
        buf.put_u8(CHECKSUM_NONE);
        for arg in &self.args {
            put_str2(&mut buf, arg, kind)?;
        }
        finish(kind, id, buf)
    }
}

/// Payload of init request and response frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitPayload {
    pub version: u16,
    pub headers: Vec<(String, String)>,
}

impl InitPayload {
    /// Init payload announcing `host_port` and `process_name`.
    pub fn new(host_port: &str, process_name: &str) -> Self {
        Self {
            version: INIT_VERSION,
            headers: vec![
                (INIT_HOST_PORT.to_string(), host_port.to_string()),
                (INIT_PROCESS_NAME.to_string(), process_name.to_string()),
            ],
        }
    }

    /// Value of the first header named `key`.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn into_frame(self, message_type: MessageType, id: u32) -> Result<Frame> {
        let mut buf = BytesMut::new();
        buf.put_u16(self.version);
        buf.put_u16(self.headers.len() as u16);
        for (key, value) in &self.headers {
            put_str2(&mut buf, key.as_bytes(), message_type)?;
            put_str2(&mut buf, value.as_bytes(), message_type)?;
        }
        finish(message_type, id, buf)
    }

    pub fn parse(frame: &Frame) -> Result<Self> {
        let kind = frame.message_type();
        if !matches!(kind, MessageType::InitReq | MessageType::InitRes) {
            return Err(FrameError::Malformed {
                kind,
                reason: "not an init frame",
            });
        }
        let mut src = frame.payload.as_ref();
        if src.remaining() < 4 {
            return Err(FrameError::Malformed {
                kind,
                reason: "truncated init header",
            });
        }
        let version = src.get_u16();
        let count = src.get_u16() as usize;
        let mut headers = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            let key = get_string2(&mut src, kind)?;
            let value = get_string2(&mut src, kind)?;
            headers.push((key, value));
        }
        Ok(Self { version, headers })
    }
}

fn finish(message_type: MessageType, id: u32, buf: BytesMut) -> Result<Frame> {
    let size = HEADER_SIZE + buf.len();
    if size > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(Frame::new(message_type, id, buf.freeze()))
}

fn put_str1(buf: &mut BytesMut, value: &[u8], kind: MessageType) -> Result<()> {
    let len = u8::try_from(value.len()).map_err(|_| FrameError::Malformed {
        kind,
        reason: "field longer than 255 bytes",
    })?;
    buf.put_u8(len);
    buf.put_slice(value);
    Ok(())
}

fn put_str2(buf: &mut BytesMut, value: &[u8], kind: MessageType) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| FrameError::Malformed {
        kind,
        reason: "field longer than 65535 bytes",
    })?;
    buf.put_u16(len);
    buf.put_slice(value);
    Ok(())
}

fn put_headers1(buf: &mut BytesMut, headers: &[(String, String)], kind: MessageType) -> Result<()> {
    let count = u8::try_from(headers.len()).map_err(|_| FrameError::Malformed {
        kind,
        reason: "more than 255 headers",
    })?;
    buf.put_u8(count);
    for (key, value) in headers {
        put_str1(buf, key.as_bytes(), kind)?;
        put_str1(buf, value.as_bytes(), kind)?;
    }
    Ok(())
}

fn get_string2(src: &mut &[u8], kind: MessageType) -> Result<String> {
    if src.remaining() < 2 {
        return Err(FrameError::Malformed {
            kind,
            reason: "truncated length prefix",
        });
    }
    let len = src.get_u16() as usize;
    if src.remaining() < len {
        return Err(FrameError::Malformed {
            kind,
            reason: "truncated string",
        });
    }
    let value = std::str::from_utf8(&src[..len])
        .map_err(|_| FrameError::Malformed {
            kind,
            reason: "string is not utf-8",
        })?
        .to_string();
    src.advance(len);
    Ok(value)
}
