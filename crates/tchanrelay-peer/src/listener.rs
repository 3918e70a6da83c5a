use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tchanrelay_transport::{TcpTransport, TransportError};
use tracing::{info, warn};

use crate::channel::Channel;
use crate::connection::Connection;
use crate::error::Result;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Accepts inbound connections for a [`Channel`].
pub struct RelayListener {
    transport: TcpTransport,
    channel: Arc<Channel>,
}

impl RelayListener {
    pub(crate) fn new(transport: TcpTransport, channel: Arc<Channel>) -> Self {
        Self { transport, channel }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Accept one connection and run the handshake on the calling thread.
    pub fn accept(&self) -> Result<Arc<Connection>> {
        let stream = self.transport.accept()?;
        self.channel.accept(stream)
    }

    /// Accept connections until `running` turns false.
    ///
    /// Each accepted stream is handshaken on its own thread, so a slow or
    /// silent client cannot hold up the accept loop. Handshake failures are
    /// logged and only cost that one connection.
    pub fn serve(&self, running: &AtomicBool) -> Result<()> {
        self.transport.set_nonblocking(true)?;
        info!(addr = %self.local_addr(), "relay accepting connections");

        while running.load(Ordering::SeqCst) {
            let stream = match self.transport.accept() {
                Ok(stream) => stream,
                Err(TransportError::Accept(err)) if err.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                    continue;
                }
                Err(TransportError::Accept(err))
                    if matches!(
                        err.kind(),
                        ErrorKind::Interrupted | ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let peer_addr = stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "<unknown>".to_string());
            let channel = Arc::clone(&self.channel);
            let spawned = thread::Builder::new()
                .name("tchanrelay-accept".to_string())
                .spawn(move || {
                    if let Err(err) = channel.accept(stream) {
                        warn!(%peer_addr, error = %err, "inbound handshake failed");
                    }
                });
            if let Err(err) = spawned {
                warn!(error = %err, "failed to spawn handshake thread");
            }
        }

        self.transport.set_nonblocking(false)?;
        info!(addr = %self.local_addr(), "relay stopped accepting connections");
        Ok(())
    }
}

impl std::fmt::Debug for RelayListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayListener")
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}
