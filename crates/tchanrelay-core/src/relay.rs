use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use tchanrelay_frame::{ErrorCode, Frame, MessageType};
use tracing::{debug, warn};

use crate::error::{RelayError, Result};
use crate::traits::{FrameSink, RelayChannel, SinkClosed};

/// Which way frames flow through a remap entry.
///
/// The direction also names the id space of the key: request entries are
/// keyed by ids the remote issued, response entries by ids this side
/// allocated on the connection. A connection that carries calls both ways
/// uses both id spaces independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Entry on the caller's relay: frames travel toward the callee.
    Request,
    /// Entry on the callee's relay: frames travel back to the caller.
    Response,
}

impl Direction {
    /// The id space a relayed frame of `kind` belongs to, or `None` for
    /// frames that are never relayed.
    pub fn of(kind: MessageType) -> Option<Self> {
        match kind {
            MessageType::CallReq
            | MessageType::CallReqContinue
            | MessageType::Cancel
            | MessageType::Claim => Some(Direction::Request),
            MessageType::CallRes | MessageType::CallResContinue | MessageType::Error => {
                Some(Direction::Response)
            }
            _ => None,
        }
    }

    fn opposite(self) -> Self {
        match self {
            Direction::Request => Direction::Response,
            Direction::Response => Direction::Request,
        }
    }
}

/// Attempts at finding a free id on the destination connection.
const MAX_ID_ATTEMPTS: usize = 16;

type RemapTable = HashMap<u32, RemapEntry>;

/// A frame arriving under the entry's key is rewritten to `remap_id` and
/// handed to `destination`.
#[derive(Debug, Clone)]
pub struct RemapEntry {
    pub remap_id: u32,
    pub destination: Weak<Relay>,
    pub direction: Direction,
}

/// What happened to a relayed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Rewritten and handed to the destination's outbound path.
    Forwarded,
    /// The call failed and an error frame went back to the caller.
    Rejected(ErrorCode),
    /// The frame could not be delivered and the caller is unreachable.
    Dropped,
}

/// Per-connection relay state.
///
/// Holds the id remapping tables for calls flowing through one connection.
/// Destinations are weak: each relay is owned by its connection alone.
pub struct Relay {
    requests: RwLock<RemapTable>,
    responses: RwLock<RemapTable>,
    channel: Weak<dyn RelayChannel>,
    outbound: Arc<dyn FrameSink>,
    label: String,
}

impl Relay {
    /// Create a relay for one connection. `label` names the connection in logs.
    pub fn new(
        channel: Weak<dyn RelayChannel>,
        outbound: Arc<dyn FrameSink>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
            responses: RwLock::new(HashMap::new()),
            channel,
            outbound,
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of ids currently mapped on this connection, both ways.
    pub fn active_calls(&self) -> usize {
        self.read_table(Direction::Request).len() + self.read_table(Direction::Response).len()
    }

    /// The mapping for a local id in the given id space, if any.
    pub fn remap_entry(&self, direction: Direction, id: u32) -> Option<RemapEntry> {
        self.read_table(direction).get(&id).cloned()
    }

    /// Hand a frame that already carries a local id to this connection's
    /// outbound path. Never blocks on the network.
    pub fn receive(&self, frame: Frame) -> Result<()> {
        self.outbound.enqueue(frame).map_err(|SinkClosed(frame)| {
            debug!(relay = %self.label, id = frame.id(), kind = %frame.message_type(), "outbound path closed");
            RelayError::DeliveryFailed {
                connection: self.label.clone(),
                id: frame.id(),
            }
        })
    }

    /// Route a frame that arrived on this relay's connection.
    ///
    /// `Err` is returned only for errors scoped to this connection: protocol
    /// violations by the sender, or this connection's own outbound path being
    /// gone. Failures of a single call are answered with an error frame and
    /// reported as [`RelayOutcome::Rejected`].
    pub fn relay_frame(self: &Arc<Self>, frame: Frame) -> Result<RelayOutcome> {
        if frame.is_call_initiation() {
            self.relay_call(frame)
        } else {
            self.relay_continuation(frame)
        }
    }

    fn relay_continuation(self: &Arc<Self>, mut frame: Frame) -> Result<RelayOutcome> {
        let id = frame.id();
        let kind = frame.message_type();
        let direction = Direction::of(kind).ok_or(RelayError::NotRelayable { id, kind })?;
        let entry = self
            .read_table(direction)
            .get(&id)
            .cloned()
            .ok_or(RelayError::UnknownId { id, kind })?;

        // Drop the mapping before the caller can see the last frame, so the
        // caller may reuse the id as soon as the response arrives.
        if entry.direction == Direction::Response && ends_call(&frame) {
            self.remove_call(id, &entry);
        }

        frame.set_id(entry.remap_id);
        self.deliver(id, &entry, frame)
    }

    fn relay_call(self: &Arc<Self>, mut frame: Frame) -> Result<RelayOutcome> {
        let id = frame.id();
        if self.read_table(Direction::Request).contains_key(&id) {
            return Err(RelayError::DuplicateId { id });
        }

        let service = frame.service()?.to_string();
        let channel = self.channel.upgrade().ok_or(RelayError::ChannelClosed)?;

        let Some(host_port) = channel.service_hosts().get_host_port(&service) else {
            warn!(relay = %self.label, id, %service, "no peers registered for service");
            return self.reject(
                id,
                ErrorCode::Declined,
                &format!("no peers for service {service:?}"),
            );
        };

        let peer = channel.get_or_add_peer(&host_port);
        let conn = match peer.connection_for_relay() {
            Ok(conn) => conn,
            Err(err) => {
                warn!(relay = %self.label, id, %service, %host_port, error = %err, "failed to connect to peer");
                return self.reject(id, ErrorCode::NetworkError, &err.to_string());
            }
        };

        let destination = conn.relay();

        // Both legs are installed before the frame leaves, otherwise a fast
        // response could race the reverse mapping.
        let reverse = RemapEntry {
            remap_id: id,
            destination: Arc::downgrade(self),
            direction: Direction::Response,
        };
        let Some(destination_id) = (0..MAX_ID_ATTEMPTS)
            .map(|_| conn.next_message_id())
            .find(|&candidate| destination.add_relay(candidate, reverse.clone()))
        else {
            warn!(relay = %self.label, destination = %destination.label, id, "no free message id on destination");
            return self.reject(
                id,
                ErrorCode::Busy,
                &format!("no free message id on {}", destination.label),
            );
        };

        let entry = RemapEntry {
            remap_id: destination_id,
            destination: Arc::downgrade(&destination),
            direction: Direction::Request,
        };
        if !self.add_relay(id, entry.clone()) {
            destination.remove_if_mapped(Direction::Response, destination_id, id);
            return Err(RelayError::DuplicateId { id });
        }

        channel
            .stats()
            .inc_counter("relay", &[("service", service.as_str())], 1);
        debug!(
            relay = %self.label,
            destination = %destination.label,
            id,
            destination_id,
            %service,
            %host_port,
            "relaying call"
        );

        frame.set_id(destination_id);
        self.deliver(id, &entry, frame)
    }

    fn deliver(&self, local_id: u32, entry: &RemapEntry, frame: Frame) -> Result<RelayOutcome> {
        let delivered = match entry.destination.upgrade() {
            Some(destination) => destination.receive(frame),
            None => Err(RelayError::DeliveryFailed {
                connection: "<closed connection>".to_string(),
                id: frame.id(),
            }),
        };

        match delivered {
            Ok(()) => Ok(RelayOutcome::Forwarded),
            Err(err) => {
                warn!(relay = %self.label, id = local_id, error = %err, "failed to deliver frame, failing call");
                self.remove_call(local_id, entry);
                match entry.direction {
                    Direction::Request => {
                        self.reject(local_id, ErrorCode::NetworkError, &err.to_string())
                    }
                    Direction::Response => Ok(RelayOutcome::Dropped),
                }
            }
        }
    }

    /// Answer the caller with an error frame for `id`.
    fn reject(&self, id: u32, code: ErrorCode, message: &str) -> Result<RelayOutcome> {
        self.receive(Frame::error(id, code, message))?;
        Ok(RelayOutcome::Rejected(code))
    }

    /// Fail every call still mapped on this relay. Called once the
    /// connection is gone.
    ///
    /// Callers waiting on a call routed through this connection get a
    /// `NetworkError` frame and their leg is released. Calls this
    /// connection originated only lose their local leg: the callee's leg
    /// stays until its response arrives and is dropped, so a late response
    /// is not mistaken for a protocol violation. Returns the number of calls
    /// failed.
    pub fn fail_pending(&self, reason: &str) -> usize {
        let requests = std::mem::take(&mut *self.write_table(Direction::Request));
        let responses = std::mem::take(&mut *self.write_table(Direction::Response));

        for (id, entry) in &responses {
            let Some(caller) = entry.destination.upgrade() else {
                continue;
            };
            caller.remove_if_mapped(Direction::Request, entry.remap_id, *id);
            let frame = Frame::error(entry.remap_id, ErrorCode::NetworkError, reason);
            if caller.receive(frame).is_err() {
                debug!(relay = %self.label, caller = %caller.label, id = entry.remap_id, "caller gone, dropping failure");
            }
        }

        let failed = requests.len() + responses.len();
        if failed > 0 {
            debug!(
                relay = %self.label,
                originated = requests.len(),
                routed = responses.len(),
                "failed pending calls"
            );
        }
        failed
    }

    /// Record that frames for `id` go to `entry.destination` as
    /// `entry.remap_id`. Returns false, leaving the table untouched, if `id`
    /// is already mapped in that id space.
    fn add_relay(&self, id: u32, entry: RemapEntry) -> bool {
        let mut table = self.write_table(entry.direction);
        match table.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    /// Remove both legs of the call keyed by `id` on this relay.
    fn remove_call(&self, id: u32, entry: &RemapEntry) {
        self.remove_if_mapped(entry.direction, id, entry.remap_id);
        if let Some(destination) = entry.destination.upgrade() {
            destination.remove_if_mapped(entry.direction.opposite(), entry.remap_id, id);
        }
    }

    fn remove_if_mapped(&self, direction: Direction, id: u32, remap_id: u32) {
        let mut table = self.write_table(direction);
        if table.get(&id).is_some_and(|e| e.remap_id == remap_id) {
            table.remove(&id);
        }
    }

    fn table(&self, direction: Direction) -> &RwLock<RemapTable> {
        match direction {
            Direction::Request => &self.requests,
            Direction::Response => &self.responses,
        }
    }

    fn read_table(&self, direction: Direction) -> RwLockReadGuard<'_, RemapTable> {
        self.table(direction).read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_table(&self, direction: Direction) -> RwLockWriteGuard<'_, RemapTable> {
        self.table(direction).write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("label", &self.label)
            .field("active_calls", &self.active_calls())
            .finish()
    }
}

/// Returns true for the last frame of a call on the response leg.
fn ends_call(frame: &Frame) -> bool {
    match frame.message_type() {
        MessageType::CallRes | MessageType::CallResContinue => !frame.more_fragments(),
        MessageType::Error => true,
        _ => false,
    }
}
