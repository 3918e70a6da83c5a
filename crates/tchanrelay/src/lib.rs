//! Identifier-remapping relay for a multiplexed RPC protocol.
//!
//! Calls arriving on one connection are forwarded to a peer chosen by
//! service name, with message ids rewritten so each connection only sees
//! ids it issued itself.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP listener and stream
//! - [`frame`]: frame codec and the call metadata the relay reads
//! - [`relay`]: id remapping tables and the service peer registry
//! - [`peer`]: connections, peers and the listening channel (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use tchanrelay_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use tchanrelay_frame::*;
}

/// Re-export relay types.
pub mod relay {
    pub use tchanrelay_core::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use tchanrelay_peer::*;
}
