use crate::message::MessageType;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The size field is smaller than the fixed header.
    #[error("frame size {0} is smaller than the 16-byte header")]
    FrameTooShort(usize),

    /// The frame exceeds the configured maximum size.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The header carries a message type this codec does not know.
    #[error("unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),

    /// The payload does not match the layout of its message type.
    #[error("malformed {kind} payload: {reason}")]
    Malformed {
        kind: MessageType,
        reason: &'static str,
    },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
