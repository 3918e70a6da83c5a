//! Seams between the relay and the connection layer.

use std::sync::Arc;

use tchanrelay_frame::Frame;

use crate::error::Result;
use crate::hosts::ServiceHosts;
use crate::relay::Relay;
use crate::stats::StatsReporter;

/// Returned by [`FrameSink::enqueue`] when the outbound path is gone.
/// Hands the frame back to the caller.
#[derive(Debug)]
pub struct SinkClosed(pub Frame);

/// Outbound path of one connection.
///
/// `enqueue` must not block on network I/O and must preserve submission
/// order: frames are written to the wire in the order they were enqueued.
pub trait FrameSink: Send + Sync {
    fn enqueue(&self, frame: Frame) -> std::result::Result<(), SinkClosed>;
}

/// A connection the relay can forward calls onto.
pub trait RelayConnection: Send + Sync {
    /// Allocate a message id unique among the ids in flight on this connection.
    fn next_message_id(&self) -> u32;

    /// The relay attached to this connection.
    fn relay(&self) -> Arc<Relay>;
}

/// A remote peer, reachable through one or more connections.
pub trait RelayPeer: Send + Sync {
    /// Return an existing connection or establish a new one.
    fn connection_for_relay(&self) -> Result<Arc<dyn RelayConnection>>;
}

/// Process-wide state shared by every relay.
pub trait RelayChannel: Send + Sync {
    fn service_hosts(&self) -> &ServiceHosts;

    /// Return the peer for `host_port`, creating it if unknown.
    fn get_or_add_peer(&self, host_port: &str) -> Arc<dyn RelayPeer>;

    fn stats(&self) -> &dyn StatsReporter;
}
