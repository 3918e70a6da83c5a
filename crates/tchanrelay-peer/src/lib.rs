//! Connection and peer management for the frame relay.
//!
//! A [`Channel`] owns the service directory and the peers it knows about.
//! Every [`Connection`] gets its own relay, a reader thread that feeds it and
//! a writer thread draining its outbound queue. Connections are opened on
//! demand when a call is routed to a peer, or accepted by a [`RelayListener`].

pub mod channel;
pub mod connection;
pub mod connector;
pub mod error;
pub mod handshake;
pub mod listener;
pub mod peer;

pub use channel::{Channel, ChannelConfig};
pub use connection::{Connection, ConnectionDirection, SendQueue, CONNECTION_ERROR_ID};
pub use connector::{connect, connect_with_config, Established};
pub use error::{PeerError, Result};
pub use handshake::{
    handshake_client, handshake_server, HandshakeConfig, HandshakeResult, EPHEMERAL_HOST_PORT,
    HANDSHAKE_ID,
};
pub use listener::RelayListener;
pub use peer::{Peer, PeerList};
