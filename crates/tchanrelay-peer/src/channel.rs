use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use tchanrelay_core::{NullStatsReporter, RelayChannel, RelayPeer, ServiceHosts, StatsReporter};
use tchanrelay_frame::FrameConfig;
use tchanrelay_transport::{NetStream, TcpTransport};
use tracing::{debug, info};

use crate::connection::{Connection, ConnectionDirection};
use crate::connector::{accept_stream, connect_with_config, Established};
use crate::error::Result;
use crate::handshake::{HandshakeConfig, EPHEMERAL_HOST_PORT};
use crate::listener::RelayListener;
use crate::peer::PeerList;

/// Runtime configuration of a [`Channel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Timeout for establishing an outbound TCP connection.
    pub connect_timeout: Duration,
    pub handshake: HandshakeConfig,
    /// Frame limits and socket timeouts once the handshake completed.
    pub frame: FrameConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            handshake: HandshakeConfig::default(),
            frame: FrameConfig::default(),
        }
    }
}

/// Process-wide relay state: service directory, known peers and stats.
///
/// Every connection's relay holds a weak handle to the channel.
pub struct Channel {
    config: ChannelConfig,
    hosts: Arc<ServiceHosts>,
    peers: PeerList,
    stats: Arc<dyn StatsReporter>,
    host_port: RwLock<String>,
    connections: Mutex<Vec<Weak<Connection>>>,
    next_connection_id: AtomicU64,
    self_ref: Weak<Channel>,
}

impl Channel {
    /// Create a channel that discards stats.
    pub fn new(config: ChannelConfig, hosts: Arc<ServiceHosts>) -> Arc<Self> {
        Self::with_stats(config, hosts, Arc::new(NullStatsReporter))
    }

    pub fn with_stats(
        config: ChannelConfig,
        hosts: Arc<ServiceHosts>,
        stats: Arc<dyn StatsReporter>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref: &Weak<Channel>| Self {
            config,
            hosts,
            peers: PeerList::new(self_ref.clone()),
            stats,
            host_port: RwLock::new(EPHEMERAL_HOST_PORT.to_string()),
            connections: Mutex::new(Vec::new()),
            next_connection_id: AtomicU64::new(1),
            self_ref: self_ref.clone(),
        })
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn hosts(&self) -> &Arc<ServiceHosts> {
        &self.hosts
    }

    pub fn peers(&self) -> &PeerList {
        &self.peers
    }

    /// The host:port announced in init frames. Ephemeral until [`Channel::listen`].
    pub fn host_port(&self) -> String {
        self.host_port
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Bind `addr` and start announcing it as this channel's host:port.
    pub fn listen(self: &Arc<Self>, addr: &str) -> Result<RelayListener> {
        let transport = TcpTransport::bind(addr)?;
        let local_addr = transport.local_addr().to_string();
        *self.host_port.write().unwrap_or_else(|e| e.into_inner()) = local_addr;
        Ok(RelayListener::new(transport, Arc::clone(self)))
    }

    /// Number of connections that are still open.
    pub fn connection_count(&self) -> usize {
        self.live_connections().len()
    }

    /// Close every connection, dialed or accepted.
    pub fn close(&self) {
        let connections = self.live_connections();
        info!(connections = connections.len(), "closing channel");
        for conn in connections {
            conn.close();
        }
    }

    /// Dial `host_port` and start relaying on the new connection.
    pub(crate) fn dial(&self, host_port: &str) -> Result<Arc<Connection>> {
        info!(%host_port, "connecting to peer");
        let established = connect_with_config(host_port, &self.host_port(), &self.config)?;
        self.spawn_connection(established, ConnectionDirection::Outbound)
    }

    /// Handshake an accepted stream and start relaying on it.
    ///
    /// Remotes that announce a real host:port become reachable through the
    /// peer of that name.
    pub(crate) fn accept(&self, stream: NetStream) -> Result<Arc<Connection>> {
        let established = accept_stream(stream, &self.host_port(), &self.config)?;
        let conn = self.spawn_connection(established, ConnectionDirection::Inbound)?;
        if !conn.remote().is_ephemeral() {
            self.peers
                .get_or_add(&conn.remote().remote_host_port)
                .add_connection(Arc::clone(&conn));
        }
        Ok(conn)
    }

    fn spawn_connection(
        &self,
        established: Established,
        direction: ConnectionDirection,
    ) -> Result<Arc<Connection>> {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let channel: Weak<dyn RelayChannel> = self.self_ref.clone();
        let Established {
            reader,
            writer,
            remote,
        } = established;

        let conn = Connection::spawn(id, channel, reader, writer, remote, direction)?;

        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        connections.retain(|weak| weak.strong_count() > 0);
        connections.push(Arc::downgrade(&conn));
        debug!(connection = %conn.label(), open = connections.len(), "registered connection");
        Ok(conn)
    }

    fn live_connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|conn| conn.is_active())
            .collect()
    }
}

impl RelayChannel for Channel {
    fn service_hosts(&self) -> &ServiceHosts {
        &self.hosts
    }

    fn get_or_add_peer(&self, host_port: &str) -> Arc<dyn RelayPeer> {
        self.peers.get_or_add(host_port)
    }

    fn stats(&self) -> &dyn StatsReporter {
        self.stats.as_ref()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("host_port", &self.host_port())
            .field("services", &self.hosts.services())
            .field("peers", &self.peers)
            .finish()
    }
}
