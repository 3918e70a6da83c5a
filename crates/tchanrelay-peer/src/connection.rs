use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use bytes::Bytes;
use tchanrelay_core::{FrameSink, Relay, RelayChannel, RelayConnection, RelayError, SinkClosed};
use tchanrelay_frame::{
    ErrorCode, ErrorPayload, Frame, FrameError, FrameReader, FrameWriter, MessageType,
};
use tchanrelay_transport::{NetStream, TransportError};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::handshake::HandshakeResult;
use crate::peer::Peer;

/// Id used for errors that are not tied to a call.
pub const CONNECTION_ERROR_ID: u32 = u32::MAX;

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDirection {
    Inbound,
    Outbound,
}

impl fmt::Display for ConnectionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionDirection::Inbound => f.write_str("inbound"),
            ConnectionDirection::Outbound => f.write_str("outbound"),
        }
    }
}

/// Outbound queue of one connection, drained by its writer thread.
///
/// Enqueueing never touches the socket, so relays on other connections can
/// hand frames over without waiting for this connection's writes.
pub struct SendQueue {
    tx: Mutex<Option<Sender<Frame>>>,
}

impl SendQueue {
    pub fn new() -> (Arc<Self>, Receiver<Frame>) {
        let (tx, rx) = mpsc::channel();
        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    /// Stop accepting frames. Frames already queued are still written.
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

impl FrameSink for SendQueue {
    fn enqueue(&self, frame: Frame) -> std::result::Result<(), SinkClosed> {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match tx.as_ref() {
            Some(tx) => tx.send(frame).map_err(|err| SinkClosed(err.0)),
            None => Err(SinkClosed(frame)),
        }
    }
}

/// An established connection to a remote peer.
///
/// A reader thread feeds arriving frames to the connection's [`Relay`] and a
/// writer thread drains the [`SendQueue`]. The reader thread keeps the
/// connection alive until the socket closes.
pub struct Connection {
    id: u64,
    label: String,
    direction: ConnectionDirection,
    remote: HandshakeResult,
    next_message_id: AtomicU32,
    closed: AtomicBool,
    queue: Arc<SendQueue>,
    relay: Arc<Relay>,
    peer: Mutex<Weak<Peer>>,
}

impl Connection {
    /// Wrap a handshaken stream and start its reader and writer threads.
    pub(crate) fn spawn(
        id: u64,
        channel: Weak<dyn RelayChannel>,
        reader: FrameReader<NetStream>,
        writer: FrameWriter<NetStream>,
        remote: HandshakeResult,
        direction: ConnectionDirection,
    ) -> Result<Arc<Self>> {
        let label = format!("{direction}:{}#{id}", remote.remote_host_port);
        let (queue, rx) = SendQueue::new();
        let relay = Arc::new(Relay::new(
            channel,
            Arc::clone(&queue) as Arc<dyn FrameSink>,
            label.clone(),
        ));

        let conn = Arc::new(Self {
            id,
            label,
            direction,
            remote,
            next_message_id: AtomicU32::new(1),
            closed: AtomicBool::new(false),
            queue,
            relay,
            peer: Mutex::new(Weak::new()),
        });

        let weak = Arc::downgrade(&conn);
        thread::Builder::new()
            .name(format!("tchanrelay-write-{id}"))
            .spawn(move || write_loop(weak, writer, rx))
            .map_err(TransportError::Io)?;

        let reading = Arc::clone(&conn);
        if let Err(err) = thread::Builder::new()
            .name(format!("tchanrelay-read-{id}"))
            .spawn(move || read_loop(reading, reader))
        {
            conn.close();
            return Err(TransportError::Io(err).into());
        }

        debug!(connection = %conn.label, process = %conn.remote.remote_process_name, "connection established");
        Ok(conn)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name used for this connection in logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn direction(&self) -> ConnectionDirection {
        self.direction
    }

    /// What the remote announced in its init frame.
    pub fn remote(&self) -> &HandshakeResult {
        &self.remote
    }

    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Enqueue a frame that already carries an id local to this connection.
    pub fn send(&self, frame: Frame) -> std::result::Result<(), SinkClosed> {
        self.queue.enqueue(frame)
    }

    /// Stop accepting frames and let the writer shut the socket down once
    /// the queue is drained. Calls still routed through this connection are
    /// failed back to their callers. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.close();

        let peer = self.peer.lock().unwrap_or_else(|e| e.into_inner()).upgrade();
        if let Some(peer) = peer {
            peer.remove_connection(self.id);
        }

        let failed = self
            .relay
            .fail_pending(&format!("connection to {} closed", self.remote.remote_host_port));
        debug!(connection = %self.label, failed_calls = failed, "connection closed");
    }

    pub(crate) fn attach_peer(&self, peer: &Arc<Peer>) {
        *self.peer.lock().unwrap_or_else(|e| e.into_inner()) = Arc::downgrade(peer);
    }

    fn handle_frame(&self, frame: Frame) -> std::result::Result<(), RelayError> {
        let kind = frame.message_type();
        if !kind.is_connection_level() {
            let outcome = self.relay.relay_frame(frame)?;
            trace!(connection = %self.label, ?outcome, "relayed frame");
            return Ok(());
        }

        match kind {
            MessageType::PingReq => {
                let pong = Frame::new(MessageType::PingRes, frame.id(), Bytes::new());
                self.relay.receive(pong)
            }
            MessageType::PingRes => Ok(()),
            _ => Err(RelayError::Frame(FrameError::Malformed {
                kind,
                reason: "init frame after handshake",
            })),
        }
    }

    /// Report a fatal error to the remote before the connection closes.
    fn send_fatal(&self, id: u32, message: &str) {
        let frame = Frame::error(id, ErrorCode::ProtocolError, message);
        if self.queue.enqueue(frame).is_err() {
            debug!(connection = %self.label, "could not report protocol error, queue closed");
        }
    }
}

impl RelayConnection for Connection {
    /// Ids start at 1 and wrap; the connection-level error id is skipped.
    fn next_message_id(&self) -> u32 {
        loop {
            let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
            if id != CONNECTION_ERROR_ID {
                return id;
            }
        }
    }

    fn relay(&self) -> Arc<Relay> {
        Arc::clone(&self.relay)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("label", &self.label)
            .field("active", &self.is_active())
            .field("relay", &self.relay)
            .finish()
    }
}

fn read_loop(conn: Arc<Connection>, mut reader: FrameReader<NetStream>) {
    loop {
        let frame = match reader.read_frame() {
            Ok(frame) => frame,
            Err(FrameError::ConnectionClosed) => {
                debug!(connection = %conn.label, "remote closed connection");
                break;
            }
            Err(FrameError::Io(err)) => {
                if conn.is_active() {
                    warn!(connection = %conn.label, error = %err, "read failed");
                }
                break;
            }
            Err(err) => {
                warn!(connection = %conn.label, error = %err, "undecodable frame, closing connection");
                conn.send_fatal(CONNECTION_ERROR_ID, &err.to_string());
                break;
            }
        };

        let id = frame.id();
        if id == CONNECTION_ERROR_ID && frame.message_type() == MessageType::Error {
            let message = ErrorPayload::parse(&frame)
                .map(|payload| payload.message)
                .unwrap_or_default();
            warn!(connection = %conn.label, %message, "remote reported connection error");
            break;
        }
        if let Err(err) = conn.handle_frame(frame) {
            warn!(connection = %conn.label, id, error = %err, "closing connection");
            if err.is_protocol_violation() {
                conn.send_fatal(id, &err.to_string());
            }
            break;
        }
    }
    conn.close();
}

fn write_loop(conn: Weak<Connection>, mut writer: FrameWriter<NetStream>, rx: Receiver<Frame>) {
    // Ends once the queue is closed and drained.
    for frame in rx.iter() {
        if let Err(err) = writer.write_frame(&frame) {
            warn!(id = frame.id(), kind = %frame.message_type(), error = %err, "write failed");
            if let Some(conn) = conn.upgrade() {
                conn.close();
            }
            break;
        }
    }

    if let Err(err) = writer.get_ref().shutdown() {
        debug!(error = %err, "socket shutdown failed");
    }
}
