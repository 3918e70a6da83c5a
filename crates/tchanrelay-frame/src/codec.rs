use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::message::MessageType;

/// Frame header: size (2) + type (1) + reserved (1) + id (4) + reserved (8) = 16 bytes.
pub const HEADER_SIZE: usize = 16;

/// Largest frame the size field can describe, header included.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Routing part of the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Kind of message this frame carries.
    pub message_type: MessageType,
    /// Connection-scoped message id. The relay rewrites this field.
    pub id: u32,
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    /// Everything after the 16-byte header.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(message_type: MessageType, id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            header: FrameHeader { message_type, id },
            payload: payload.into(),
        }
    }

    /// Message kind from the header.
    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }

    /// Connection-scoped message id.
    pub fn id(&self) -> u32 {
        self.header.id
    }

    /// Replace the message id, leaving the payload untouched.
    pub fn set_id(&mut self, id: u32) {
        self.header.id = id;
    }

    /// Returns true if this frame starts a new call.
    pub fn is_call_initiation(&self) -> bool {
        self.header.message_type.is_call_initiation()
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format (big-endian):
/// ```text
/// ┌──────────┬────────┬──────────┬──────────┬──────────────┬──────────────┐
/// │ Size     │ Type   │ Reserved │ Id       │ Reserved     │ Payload      │
/// │ (2B)     │ (1B)   │ (1B)     │ (4B)     │ (8B)         │ (Size - 16B) │
/// └──────────┴────────┴──────────┴──────────┴──────────────┴──────────────┘
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    let size = frame.wire_size();
    if size > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }
    dst.reserve(size);
    dst.put_u16(size as u16);
    dst.put_u8(frame.header.message_type.as_u8());
    dst.put_u8(0);
    dst.put_u32(frame.header.id);
    dst.put_bytes(0, 8);
    dst.put_slice(&frame.payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_frame_size: usize) -> Result<Option<Frame>> {
    if src.len() < 2 {
        return Ok(None);
    }

    let size = u16::from_be_bytes([src[0], src[1]]) as usize;
    if size < HEADER_SIZE {
        return Err(FrameError::FrameTooShort(size));
    }
    if size > max_frame_size {
        return Err(FrameError::FrameTooLarge {
            size,
            max: max_frame_size,
        });
    }
    if src.len() < size {
        return Ok(None);
    }

    let message_type = MessageType::from_u8(src[2])?;
    let id = u32::from_be_bytes([src[4], src[5], src[6], src[7]]);

    src.advance(HEADER_SIZE);
    let payload = src.split_to(size - HEADER_SIZE).freeze();

    Ok(Some(Frame {
        header: FrameHeader { message_type, id },
        payload,
    }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum frame size in bytes, header included. Default: 65535.
    pub max_frame_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
