//! Identifier-remapping frame relay.
//!
//! A [`Relay`] sits on every connection that takes part in relaying. When a
//! call request arrives, the relay picks a destination through
//! [`ServiceHosts`], obtains a connection to it, allocates a fresh message id
//! on that connection, and records the mapping on both relays. Later frames
//! of the call, in either direction, are rewritten through those mappings so
//! each side only ever sees ids it issued.
//!
//! The connection layer plugs in through the traits in [`traits`].

pub mod error;
pub mod hosts;
pub mod relay;
pub mod stats;
pub mod traits;

pub use error::{RelayError, Result};
pub use hosts::ServiceHosts;
pub use relay::{Direction, Relay, RelayOutcome, RemapEntry};
pub use stats::{InMemoryStats, NullStatsReporter, StatsReporter};
pub use traits::{FrameSink, RelayChannel, RelayConnection, RelayPeer, SinkClosed};
