/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] tchanrelay_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] tchanrelay_frame::FrameError),

    /// Handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// The remote answered the handshake with an error frame.
    #[error("peer rejected handshake ({code:?}): {message}")]
    Rejected {
        code: tchanrelay_frame::ErrorCode,
        message: String,
    },

    /// Handshake timed out.
    #[error("handshake timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The channel owning this peer has been dropped.
    #[error("channel is shut down")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, PeerError>;
