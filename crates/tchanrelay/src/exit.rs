//! Process exit codes and the error type every command returns.

use std::fmt;
use std::io;

use tchanrelay_frame::FrameError;
use tchanrelay_peer::PeerError;
use tchanrelay_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const CONFIG_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

/// A failure that ends the process with `code` after printing `message`.
#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Wrap a library error, prefixing `context` and picking its exit code.
    pub fn context<E: ExitStatus + fmt::Display>(context: &str, err: E) -> Self {
        Self::new(err.exit_code(), format!("{context}: {err}"))
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CliError {}

/// Maps a library error onto a process exit code.
pub trait ExitStatus {
    fn exit_code(&self) -> i32;
}

impl ExitStatus for io::Error {
    fn exit_code(&self) -> i32 {
        match self.kind() {
            io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::AddrInUse => FAILURE,
            _ => INTERNAL,
        }
    }
}

impl ExitStatus for TransportError {
    fn exit_code(&self) -> i32 {
        match self {
            TransportError::Bind { source, .. }
            | TransportError::Connect { source, .. }
            | TransportError::Accept(source)
            | TransportError::Io(source) => source.exit_code(),
            TransportError::Unresolved(_) => TRANSPORT_ERROR,
        }
    }
}

impl ExitStatus for FrameError {
    fn exit_code(&self) -> i32 {
        match self {
            FrameError::Io(source) => source.exit_code(),
            FrameError::ConnectionClosed => FAILURE,
            _ => TRANSPORT_ERROR,
        }
    }
}

impl ExitStatus for PeerError {
    fn exit_code(&self) -> i32 {
        match self {
            PeerError::Transport(err) => err.exit_code(),
            PeerError::Frame(err) => err.exit_code(),
            PeerError::Timeout(_) => TIMEOUT,
            PeerError::HandshakeFailed(_) | PeerError::Rejected { .. } => TRANSPORT_ERROR,
            PeerError::Disconnected(_) => FAILURE,
            PeerError::ChannelClosed => INTERNAL,
        }
    }
}
