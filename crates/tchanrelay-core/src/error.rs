use tchanrelay_frame::{ErrorCode, FrameError, MessageType};

/// Errors surfaced by the relay.
///
/// Protocol violations are connection-scoped: the connection layer reports
/// them to the offending peer and closes only that connection.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A continuation frame referenced an id this relay never routed.
    #[error("got {kind} for inactive id {id}")]
    UnknownId { id: u32, kind: MessageType },

    /// A frame that only the connection itself handles reached the relay.
    #[error("{kind} frame (id {id}) cannot be relayed")]
    NotRelayable { id: u32, kind: MessageType },

    /// A call request reused an id that is still in flight.
    #[error("call req with already active id {id}")]
    DuplicateId { id: u32 },

    /// The call metadata could not be read.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A connection to the selected peer could not be obtained.
    #[error("failed to connect to {host_port}: {reason}")]
    Connect { host_port: String, reason: String },

    /// The outbound path of a connection is gone.
    #[error("outbound path of {connection} is closed (frame id {id})")]
    DeliveryFailed { connection: String, id: u32 },

    /// The owning channel has been dropped.
    #[error("channel is shut down")]
    ChannelClosed,
}

impl RelayError {
    /// Returns true if the error was caused by a misbehaving peer.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            RelayError::UnknownId { .. }
                | RelayError::NotRelayable { .. }
                | RelayError::DuplicateId { .. }
                | RelayError::Frame(_)
        )
    }

    /// Error code used when this error is reported in an error frame.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RelayError::UnknownId { .. }
            | RelayError::NotRelayable { .. }
            | RelayError::DuplicateId { .. }
            | RelayError::Frame(_) => ErrorCode::ProtocolError,
            RelayError::Connect { .. } | RelayError::DeliveryFailed { .. } => {
                ErrorCode::NetworkError
            }
            RelayError::ChannelClosed => ErrorCode::Declined,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
