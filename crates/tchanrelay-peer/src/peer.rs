use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use tchanrelay_core::{RelayConnection, RelayError, RelayPeer};
use tracing::debug;

use crate::channel::Channel;
use crate::connection::Connection;
use crate::error::{PeerError, Result};

/// A remote host:port and the connections open to it.
///
/// Connections come from two places: dialed on demand by [`Peer::get_connection`],
/// or accepted by a listener from a remote that advertised this host:port.
pub struct Peer {
    host_port: String,
    channel: Weak<Channel>,
    connections: Mutex<Vec<Arc<Connection>>>,
    // Serializes dialing so concurrent callers share one new connection.
    dial_lock: Mutex<()>,
    self_ref: Weak<Peer>,
}

impl Peer {
    pub(crate) fn new(host_port: &str, channel: Weak<Channel>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            host_port: host_port.to_string(),
            channel,
            connections: Mutex::new(Vec::new()),
            dial_lock: Mutex::new(()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn host_port(&self) -> &str {
        &self.host_port
    }

    /// Snapshot of the open connections.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.lock_connections().clone()
    }

    /// First connection that is still open, if any.
    pub fn active_connection(&self) -> Option<Arc<Connection>> {
        self.lock_connections()
            .iter()
            .find(|conn| conn.is_active())
            .cloned()
    }

    /// Return an open connection, dialing one if none exists.
    ///
    /// Dialing happens outside the connection list lock, so callers holding
    /// other connections are never blocked behind it.
    pub fn get_connection(&self) -> Result<Arc<Connection>> {
        if let Some(conn) = self.active_connection() {
            return Ok(conn);
        }

        let _dialing = self.dial_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(conn) = self.active_connection() {
            return Ok(conn);
        }

        let channel = self.channel.upgrade().ok_or(PeerError::ChannelClosed)?;
        let conn = channel.dial(&self.host_port)?;
        self.add_connection(Arc::clone(&conn));
        Ok(conn)
    }

    pub(crate) fn add_connection(&self, conn: Arc<Connection>) {
        if let Some(peer) = self.self_ref.upgrade() {
            conn.attach_peer(&peer);
        }
        self.lock_connections().push(Arc::clone(&conn));

        // Closed before it was attached: close() could not remove it.
        if !conn.is_active() {
            self.remove_connection(conn.id());
        }
        debug!(peer = %self.host_port, connection = %conn.label(), "added connection");
    }

    pub(crate) fn remove_connection(&self, id: u64) {
        self.lock_connections().retain(|conn| conn.id() != id);
    }

    /// Close every connection to this peer.
    pub fn close(&self) {
        let connections = std::mem::take(&mut *self.lock_connections());
        for conn in connections {
            conn.close();
        }
    }

    fn lock_connections(&self) -> MutexGuard<'_, Vec<Arc<Connection>>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RelayPeer for Peer {
    fn connection_for_relay(&self) -> tchanrelay_core::Result<Arc<dyn RelayConnection>> {
        match self.get_connection() {
            Ok(conn) => Ok(conn as Arc<dyn RelayConnection>),
            Err(PeerError::ChannelClosed) => Err(RelayError::ChannelClosed),
            Err(err) => Err(RelayError::Connect {
                host_port: self.host_port.clone(),
                reason: err.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("host_port", &self.host_port)
            .field("connections", &self.lock_connections().len())
            .finish()
    }
}

/// Peers known to a channel, keyed by host:port.
pub struct PeerList {
    channel: Weak<Channel>,
    peers: RwLock<HashMap<String, Arc<Peer>>>,
}

impl PeerList {
    pub(crate) fn new(channel: Weak<Channel>) -> Self {
        Self {
            channel,
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, host_port: &str) -> Option<Arc<Peer>> {
        self.peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(host_port)
            .cloned()
    }

    /// Return the peer for `host_port`, creating it if unknown.
    pub fn get_or_add(&self, host_port: &str) -> Arc<Peer> {
        if let Some(peer) = self.get(host_port) {
            return peer;
        }
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            peers
                .entry(host_port.to_string())
                .or_insert_with(|| Peer::new(host_port, self.channel.clone())),
        )
    }

    /// Known host:ports, sorted.
    pub fn host_ports(&self) -> Vec<String> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        let mut host_ports: Vec<String> = peers.keys().cloned().collect();
        host_ports.sort_unstable();
        host_ports
    }

    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every connection of every peer.
    pub fn close_all(&self) {
        let peers: Vec<Arc<Peer>> = self
            .peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for peer in peers {
            peer.close();
        }
    }
}

impl std::fmt::Debug for PeerList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerList")
            .field("peers", &self.host_ports())
            .finish()
    }
}
