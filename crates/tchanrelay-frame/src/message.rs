//! Message types carried in the frame header.

use std::fmt;

use crate::error::{FrameError, Result};

/// Kind of a frame, from the header's type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Connection handshake request.
    InitReq,
    /// Connection handshake response.
    InitRes,
    /// First frame of a call. Carries the target service.
    CallReq,
    /// First frame of a call's response.
    CallRes,
    /// Further request fragment.
    CallReqContinue,
    /// Further response fragment.
    CallResContinue,
    /// Caller abandoned the call.
    Cancel,
    /// Speculative-execution claim.
    Claim,
    /// Liveness probe.
    PingReq,
    /// Liveness probe answer.
    PingRes,
    /// Error response, either call-scoped or connection-scoped.
    Error,
}

impl MessageType {
    /// Wire value of this type.
    pub fn as_u8(self) -> u8 {
        match self {
            MessageType::InitReq => 0x01,
            MessageType::InitRes => 0x02,
            MessageType::CallReq => 0x03,
            MessageType::CallRes => 0x04,
            MessageType::CallReqContinue => 0x13,
            MessageType::CallResContinue => 0x14,
            MessageType::Cancel => 0xc0,
            MessageType::Claim => 0xc1,
            MessageType::PingReq => 0xd0,
            MessageType::PingRes => 0xd1,
            MessageType::Error => 0xff,
        }
    }

    /// Parse a header type byte.
    pub fn from_u8(value: u8) -> Result<Self> {
        let kind = match value {
            0x01 => MessageType::InitReq,
            0x02 => MessageType::InitRes,
            0x03 => MessageType::CallReq,
            0x04 => MessageType::CallRes,
            0x13 => MessageType::CallReqContinue,
            0x14 => MessageType::CallResContinue,
            0xc0 => MessageType::Cancel,
            0xc1 => MessageType::Claim,
            0xd0 => MessageType::PingReq,
            0xd1 => MessageType::PingRes,
            0xff => MessageType::Error,
            other => return Err(FrameError::UnknownMessageType(other)),
        };
        Ok(kind)
    }

    /// Human-readable name for logs.
    pub fn name(self) -> &'static str {
        match self {
            MessageType::InitReq => "init req",
            MessageType::InitRes => "init res",
            MessageType::CallReq => "call req",
            MessageType::CallRes => "call res",
            MessageType::CallReqContinue => "call req continue",
            MessageType::CallResContinue => "call res continue",
            MessageType::Cancel => "cancel",
            MessageType::Claim => "claim",
            MessageType::PingReq => "ping req",
            MessageType::PingRes => "ping res",
            MessageType::Error => "error",
        }
    }

    /// Returns true for the frame type that starts a new call.
    pub fn is_call_initiation(self) -> bool {
        self == MessageType::CallReq
    }

    /// Returns true for frames handled by the connection itself and never relayed.
    pub fn is_connection_level(self) -> bool {
        matches!(
            self,
            MessageType::InitReq | MessageType::InitRes | MessageType::PingReq | MessageType::PingRes
        )
    }

    /// Returns true for frame types whose payload starts with a flags byte.
    pub fn has_flags(self) -> bool {
        matches!(
            self,
            MessageType::CallReq
                | MessageType::CallRes
                | MessageType::CallReqContinue
                | MessageType::CallResContinue
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
