//! TCP transport for the frame relay.
//!
//! Provides the listener and dialer used by the connection layer, plus the
//! [`NetStream`] type every frame reader and writer is built on.
//!
//! This is the lowest layer of tchanrelay.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use stream::NetStream;
pub use tcp::TcpTransport;
