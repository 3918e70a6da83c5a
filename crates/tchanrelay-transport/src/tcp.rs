use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::NetStream;

/// TCP listener transport.
///
/// Provides bind/accept/connect over `host:port` addresses.
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind and listen on `addr` (for example `127.0.0.1:0`).
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        let local_addr = listener.local_addr().map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;

        info!(%local_addr, "listening on tcp");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection.
    ///
    /// Blocks unless the listener is in nonblocking mode, in which case an
    /// idle listener yields `TransportError::Accept` with `WouldBlock`.
    /// Accepted streams are always blocking.
    pub fn accept(&self) -> Result<NetStream> {
        let (stream, addr) = self.listener.accept().map_err(TransportError::Accept)?;
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        debug!(%addr, "accepted connection");
        Ok(NetStream::from_tcp(stream))
    }

    /// Connect to `addr`, trying each resolved address until one succeeds.
    pub fn connect(addr: &str, timeout: Duration) -> Result<NetStream> {
        let candidates: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|e| TransportError::Connect {
                addr: addr.to_string(),
                source: e,
            })?
            .collect();
        if candidates.is_empty() {
            return Err(TransportError::Unresolved(addr.to_string()));
        }

        let mut last_err = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!(%candidate, "connected to tcp peer");
                    return Ok(NetStream::from_tcp(stream));
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(TransportError::Connect {
            addr: addr.to_string(),
            source: last_err.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no candidate address")
            }),
        })
    }

    /// Switch the listener between blocking and polling accept.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener.set_nonblocking(nonblocking).map_err(Into::into)
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}
