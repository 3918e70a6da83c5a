use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use tchanrelay_core::{
    Direction, FrameSink, InMemoryStats, Relay, RelayChannel, RelayConnection, RelayError,
    RelayOutcome, RelayPeer, ServiceHosts, SinkClosed, StatsReporter,
};
use tchanrelay_frame::{CallRequest, CallResponse, ErrorCode, ErrorPayload, Frame, MessageType};

/// Collects everything enqueued on one connection.
#[derive(Default)]
struct RecordingSink {
    frames: Mutex<Vec<Frame>>,
    closed: AtomicBool,
}

impl RecordingSink {
    fn take(&self) -> Vec<Frame> {
        std::mem::take(&mut *self.frames.lock().unwrap())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl FrameSink for RecordingSink {
    fn enqueue(&self, frame: Frame) -> Result<(), SinkClosed> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkClosed(frame));
        }
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }
}

struct FakeConnection {
    next_id: AtomicU32,
    relay: Arc<Relay>,
    sink: Arc<RecordingSink>,
}

impl RelayConnection for FakeConnection {
    fn next_message_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn relay(&self) -> Arc<Relay> {
        Arc::clone(&self.relay)
    }
}

struct FakePeer {
    host_port: String,
    conn: Option<Arc<FakeConnection>>,
}

impl RelayPeer for FakePeer {
    fn connection_for_relay(&self) -> tchanrelay_core::Result<Arc<dyn RelayConnection>> {
        match &self.conn {
            Some(conn) => Ok(Arc::clone(conn) as Arc<dyn RelayConnection>),
            None => Err(RelayError::Connect {
                host_port: self.host_port.clone(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct FakeChannel {
    hosts: ServiceHosts,
    peers: Mutex<HashMap<String, Arc<FakePeer>>>,
    dialed: Mutex<Vec<String>>,
    stats: InMemoryStats,
}

impl RelayChannel for FakeChannel {
    fn service_hosts(&self) -> &ServiceHosts {
        &self.hosts
    }

    fn get_or_add_peer(&self, host_port: &str) -> Arc<dyn RelayPeer> {
        self.dialed.lock().unwrap().push(host_port.to_string());
        let mut peers = self.peers.lock().unwrap();
        let peer = peers.entry(host_port.to_string()).or_insert_with(|| {
            Arc::new(FakePeer {
                host_port: host_port.to_string(),
                conn: None,
            })
        });
        Arc::clone(peer) as Arc<dyn RelayPeer>
    }

    fn stats(&self) -> &dyn StatsReporter {
        &self.stats
    }
}

struct Harness {
    channel: Arc<FakeChannel>,
    caller: Arc<Relay>,
    caller_sink: Arc<RecordingSink>,
}

impl Harness {
    fn new() -> Self {
        let channel = Arc::new(FakeChannel::default());
        let (caller, caller_sink) = new_relay(&channel, "caller");
        Self {
            channel,
            caller,
            caller_sink,
        }
    }

    /// Register `service` on a reachable peer whose ids start at `first_id`.
    fn reachable(&self, service: &str, host_port: &str, first_id: u32) -> Arc<FakeConnection> {
        let (relay, sink) = new_relay(&self.channel, host_port);
        let conn = Arc::new(FakeConnection {
            next_id: AtomicU32::new(first_id),
            relay,
            sink,
        });
        self.channel.hosts.register(service, host_port);
        self.channel.peers.lock().unwrap().insert(
            host_port.to_string(),
            Arc::new(FakePeer {
                host_port: host_port.to_string(),
                conn: Some(Arc::clone(&conn)),
            }),
        );
        conn
    }
}

fn new_relay(channel: &Arc<FakeChannel>, label: &str) -> (Arc<Relay>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let weak: Weak<dyn RelayChannel> = Arc::downgrade(channel) as Weak<dyn RelayChannel>;
    let relay = Arc::new(Relay::new(
        weak,
        Arc::clone(&sink) as Arc<dyn FrameSink>,
        label,
    ));
    (relay, sink)
}

fn call_req(service: &str, id: u32) -> Frame {
    CallRequest::new(service)
        .with_arg(&b"echo"[..])
        .into_frame(id)
        .unwrap()
}

#[test]
fn call_and_response_round_trip() {
    let h = Harness::new();
    let callee = h.reachable("echo", "10.0.0.1:4000", 100);

    let outcome = h.caller.relay_frame(call_req("echo", 7)).unwrap();
    assert_eq!(outcome, RelayOutcome::Forwarded);

    let forwarded = callee.sink.take();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].id(), 100);
    assert_eq!(forwarded[0].message_type(), MessageType::CallReq);
    assert_eq!(forwarded[0].service().unwrap(), "echo");

    let response = CallResponse::ok()
        .with_arg(&b"pong"[..])
        .into_frame(100)
        .unwrap();
    let outcome = callee.relay.relay_frame(response.clone()).unwrap();
    assert_eq!(outcome, RelayOutcome::Forwarded);

    let back = h.caller_sink.take();
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].id(), 7);
    assert_eq!(back[0].payload, response.payload);
    assert_eq!(h.channel.stats.counter("relay", &[("service", "echo")]), 1);
}

#[test]
fn both_legs_are_mapped_before_delivery() {
    let h = Harness::new();
    let callee = h.reachable("echo", "10.0.0.1:4000", 55);

    h.caller.relay_frame(call_req("echo", 3)).unwrap();

    let forward = h.caller.remap_entry(Direction::Request, 3).expect("caller leg mapped");
    assert_eq!(forward.remap_id, 55);
    assert_eq!(forward.direction, Direction::Request);
    assert!(Arc::ptr_eq(&forward.destination.upgrade().unwrap(), &callee.relay));

    let reverse = callee.relay.remap_entry(Direction::Response, 55).expect("callee leg mapped");
    assert_eq!(reverse.remap_id, 3);
    assert_eq!(reverse.direction, Direction::Response);
    assert!(Arc::ptr_eq(&reverse.destination.upgrade().unwrap(), &h.caller));
}

#[test]
fn request_fragments_follow_the_call() {
    let h = Harness::new();
    let callee = h.reachable("echo", "10.0.0.1:4000", 20);

    let mut first = CallRequest::new("echo");
    first.more_fragments = true;
    h.caller.relay_frame(first.into_frame(9).unwrap()).unwrap();
    let cont = Frame::continuation(MessageType::CallReqContinue, 9, false, b"rest").unwrap();
    h.caller.relay_frame(cont).unwrap();

    let forwarded = callee.sink.take();
    assert_eq!(forwarded.len(), 2);
    assert!(forwarded.iter().all(|f| f.id() == 20));
    assert_eq!(forwarded[1].message_type(), MessageType::CallReqContinue);
    assert_eq!(h.channel.dialed.lock().unwrap().len(), 1);
}

#[test]
fn final_response_tears_down_both_legs() {
    let h = Harness::new();
    let callee = h.reachable("echo", "10.0.0.1:4000", 1);

    h.caller.relay_frame(call_req("echo", 4)).unwrap();
    assert_eq!(h.caller.active_calls(), 1);
    assert_eq!(callee.relay.active_calls(), 1);

    let first = CallResponse::ok().fragmented().into_frame(1).unwrap();
    callee.relay.relay_frame(first).unwrap();
    assert_eq!(h.caller.active_calls(), 1, "fragmented response keeps mapping");

    let last = Frame::continuation(MessageType::CallResContinue, 1, false, b"end").unwrap();
    callee.relay.relay_frame(last).unwrap();
    assert_eq!(h.caller.active_calls(), 0);
    assert_eq!(callee.relay.active_calls(), 0);

    let ids: Vec<u32> = h.caller_sink.take().iter().map(Frame::id).collect();
    assert_eq!(ids, vec![4, 4]);

    // The id is free again once the response has been relayed.
    h.caller.relay_frame(call_req("echo", 4)).unwrap();
    assert_eq!(h.caller.remap_entry(Direction::Request, 4).unwrap().remap_id, 2);
}

#[test]
fn error_response_ends_call() {
    let h = Harness::new();
    let callee = h.reachable("echo", "10.0.0.1:4000", 30);

    h.caller.relay_frame(call_req("echo", 5)).unwrap();
    callee
        .relay
        .relay_frame(Frame::error(30, ErrorCode::Busy, "busy"))
        .unwrap();

    let back = h.caller_sink.take();
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].id(), 5);
    assert_eq!(ErrorPayload::parse(&back[0]).unwrap().code, ErrorCode::Busy);
    assert_eq!(h.caller.active_calls(), 0);
    assert_eq!(callee.relay.active_calls(), 0);
}

#[test]
fn duplicate_call_id_is_a_protocol_error() {
    let h = Harness::new();
    let callee = h.reachable("echo", "10.0.0.1:4000", 1);

    h.caller.relay_frame(call_req("echo", 11)).unwrap();
    let err = h.caller.relay_frame(call_req("echo", 11)).unwrap_err();

    assert!(matches!(err, RelayError::DuplicateId { id: 11 }));
    assert!(err.is_protocol_violation());
    assert_eq!(err.error_code(), ErrorCode::ProtocolError);
    // The first call is untouched.
    assert_eq!(h.caller.remap_entry(Direction::Request, 11).unwrap().remap_id, 1);
    assert_eq!(callee.sink.take().len(), 1);
}

#[test]
fn unknown_id_is_a_protocol_error() {
    let h = Harness::new();
    let frame = Frame::continuation(MessageType::CallReqContinue, 77, false, b"x").unwrap();

    let err = h.caller.relay_frame(frame).unwrap_err();
    assert!(matches!(
        err,
        RelayError::UnknownId {
            id: 77,
            kind: MessageType::CallReqContinue
        }
    ));
    assert!(err.is_protocol_violation());
    assert!(h.caller_sink.take().is_empty());
}

#[test]
fn malformed_call_req_is_a_protocol_error() {
    let h = Harness::new();
    let frame = Frame::new(MessageType::CallReq, 1, &b"short"[..]);

    let err = h.caller.relay_frame(frame).unwrap_err();
    assert!(matches!(err, RelayError::Frame(_)));
    assert!(err.is_protocol_violation());
}

#[test]
fn unregistered_service_is_declined_without_dialing() {
    let h = Harness::new();

    let outcome = h.caller.relay_frame(call_req("nobody", 8)).unwrap();
    assert_eq!(outcome, RelayOutcome::Rejected(ErrorCode::Declined));

    let back = h.caller_sink.take();
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].id(), 8);
    let payload = ErrorPayload::parse(&back[0]).unwrap();
    assert_eq!(payload.code, ErrorCode::Declined);
    assert!(payload.message.contains("nobody"));

    assert!(h.channel.dialed.lock().unwrap().is_empty());
    assert_eq!(h.caller.active_calls(), 0);
}

#[test]
fn unreachable_peer_answers_caller_with_network_error() {
    let h = Harness::new();
    h.channel.hosts.register("flaky", "10.9.9.9:1");

    let outcome = h.caller.relay_frame(call_req("flaky", 12)).unwrap();
    assert_eq!(outcome, RelayOutcome::Rejected(ErrorCode::NetworkError));

    let back = h.caller_sink.take();
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].id(), 12);
    let payload = ErrorPayload::parse(&back[0]).unwrap();
    assert_eq!(payload.code, ErrorCode::NetworkError);
    assert!(payload.message.contains("10.9.9.9:1"));
    assert_eq!(h.caller.active_calls(), 0);
    assert_eq!(h.channel.stats.total("relay"), 0);
}

#[test]
fn closed_destination_fails_the_call() {
    let h = Harness::new();
    let callee = h.reachable("echo", "10.0.0.1:4000", 40);
    callee.sink.close();

    let outcome = h.caller.relay_frame(call_req("echo", 2)).unwrap();
    assert_eq!(outcome, RelayOutcome::Rejected(ErrorCode::NetworkError));

    let back = h.caller_sink.take();
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].message_type(), MessageType::Error);
    assert_eq!(back[0].id(), 2);
    assert_eq!(h.caller.active_calls(), 0);
    assert_eq!(callee.relay.active_calls(), 0);
}

#[test]
fn response_to_closed_caller_is_dropped() {
    let h = Harness::new();
    let callee = h.reachable("echo", "10.0.0.1:4000", 60);

    h.caller.relay_frame(call_req("echo", 6)).unwrap();
    h.caller_sink.close();

    let first = CallResponse::ok().fragmented().into_frame(60).unwrap();
    let outcome = callee.relay.relay_frame(first).unwrap();
    assert_eq!(outcome, RelayOutcome::Dropped);
    assert_eq!(callee.relay.active_calls(), 0);
    assert_eq!(callee.sink.take().len(), 1, "only the forwarded call req");
}

#[test]
fn own_outbound_closed_is_connection_scoped() {
    let h = Harness::new();
    h.caller_sink.close();

    let err = h.caller.relay_frame(call_req("nobody", 1)).unwrap_err();
    assert!(matches!(err, RelayError::DeliveryFailed { id: 1, .. }));
    assert!(!err.is_protocol_violation());
}

#[test]
fn dropped_channel_is_reported() {
    let channel = Arc::new(FakeChannel::default());
    let (relay, _sink) = new_relay(&channel, "orphan");
    drop(channel);

    let err = relay.relay_frame(call_req("echo", 1)).unwrap_err();
    assert!(matches!(err, RelayError::ChannelClosed));
}

#[test]
fn concurrent_callers_share_one_destination() {
    let h = Harness::new();
    let callee = h.reachable("echo", "10.0.0.1:4000", 1);

    let callers: Vec<_> = (0..4)
        .map(|i| new_relay(&h.channel, &format!("caller-{i}")))
        .collect();

    let handles: Vec<_> = callers
        .iter()
        .map(|(relay, _)| {
            let relay = Arc::clone(relay);
            thread::spawn(move || {
                for id in 0..50u32 {
                    relay.relay_frame(call_req("echo", id)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let forwarded = callee.sink.take();
    assert_eq!(forwarded.len(), 200);
    assert_eq!(callee.relay.active_calls(), 200);

    // Answer every call and check each lands on the caller that issued it.
    for frame in &forwarded {
        let response = CallResponse::ok().into_frame(frame.id()).unwrap();
        callee.relay.relay_frame(response).unwrap();
    }
    for (relay, sink) in &callers {
        let mut ids: Vec<u32> = sink.take().iter().map(Frame::id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..50).collect::<Vec<_>>());
        assert_eq!(relay.active_calls(), 0);
    }
    assert_eq!(callee.relay.active_calls(), 0);
    assert_eq!(h.channel.stats.total("relay"), 200);
}

#[test]
fn connection_level_frames_are_not_relayed() {
    let h = Harness::new();
    let ping = Frame::new(MessageType::PingReq, 3, &b""[..]);

    let err = h.caller.relay_frame(ping).unwrap_err();
    assert!(matches!(
        err,
        RelayError::NotRelayable {
            id: 3,
            kind: MessageType::PingReq
        }
    ));
    assert!(err.is_protocol_violation());
}

#[test]
fn calls_in_both_directions_keep_separate_id_spaces() {
    let h = Harness::new();
    let middle = h.reachable("inner", "10.0.0.1:4000", 1);
    let far = h.reachable("outer", "10.0.0.2:4000", 1);

    // The caller's call lands on `middle` as id 1, allocated locally.
    h.caller.relay_frame(call_req("inner", 10)).unwrap();
    assert_eq!(middle.sink.take()[0].id(), 1);

    // The remote behind `middle` independently issues id 1 for its own call.
    let outcome = middle.relay.relay_frame(call_req("outer", 1)).unwrap();
    assert_eq!(outcome, RelayOutcome::Forwarded);
    assert_eq!(far.sink.take()[0].id(), 1);

    let ours = middle.relay.remap_entry(Direction::Response, 1).unwrap();
    assert_eq!(ours.remap_id, 10);
    let theirs = middle.relay.remap_entry(Direction::Request, 1).unwrap();
    assert_eq!(theirs.remap_id, 1);
    assert_eq!(middle.relay.active_calls(), 2);

    // Each response finds its own call.
    let to_caller = CallResponse::ok().into_frame(1).unwrap();
    middle.relay.relay_frame(to_caller).unwrap();
    let back = h.caller_sink.take();
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].id(), 10);

    let to_middle = CallResponse::ok().into_frame(1).unwrap();
    far.relay.relay_frame(to_middle).unwrap();
    let back = middle.sink.take();
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].message_type(), MessageType::CallRes);
    assert_eq!(back[0].id(), 1);

    assert_eq!(middle.relay.active_calls(), 0);
    assert_eq!(h.caller.active_calls(), 0);
    assert_eq!(far.relay.active_calls(), 0);
}

#[test]
fn allocated_id_still_in_flight_is_skipped() {
    let h = Harness::new();
    let callee = h.reachable("echo", "10.0.0.1:4000", 5);

    h.caller.relay_frame(call_req("echo", 1)).unwrap();
    // The allocator wraps back onto the id of the call still in flight.
    callee.next_id.store(5, Ordering::SeqCst);
    h.caller.relay_frame(call_req("echo", 2)).unwrap();

    assert_eq!(
        callee.relay.remap_entry(Direction::Response, 5).unwrap().remap_id,
        1,
        "first call keeps its mapping"
    );
    assert_eq!(h.caller.remap_entry(Direction::Request, 2).unwrap().remap_id, 6);
    let ids: Vec<u32> = callee.sink.take().iter().map(Frame::id).collect();
    assert_eq!(ids, vec![5, 6]);
}

#[test]
fn closed_destination_fails_calls_in_flight() {
    let h = Harness::new();
    let callee = h.reachable("echo", "10.0.0.1:4000", 70);

    h.caller.relay_frame(call_req("echo", 8)).unwrap();
    h.caller.relay_frame(call_req("echo", 9)).unwrap();

    callee.sink.close();
    assert_eq!(callee.relay.fail_pending("connection closed"), 2);

    let mut back = h.caller_sink.take();
    back.sort_by_key(Frame::id);
    let ids: Vec<u32> = back.iter().map(Frame::id).collect();
    assert_eq!(ids, vec![8, 9]);
    for frame in &back {
        assert_eq!(frame.message_type(), MessageType::Error);
        let payload = ErrorPayload::parse(frame).unwrap();
        assert_eq!(payload.code, ErrorCode::NetworkError);
        assert_eq!(payload.message, "connection closed");
    }
    assert_eq!(h.caller.active_calls(), 0);
    assert_eq!(callee.relay.active_calls(), 0);

    // Both ids are free for new calls.
    let replacement = h.reachable("echo2", "10.0.0.2:4000", 1);
    h.caller.relay_frame(call_req("echo2", 8)).unwrap();
    assert_eq!(replacement.sink.take().len(), 1);
}

#[test]
fn closed_caller_drops_late_response() {
    let h = Harness::new();
    let callee = h.reachable("echo", "10.0.0.1:4000", 90);

    h.caller.relay_frame(call_req("echo", 4)).unwrap();
    h.caller_sink.close();
    assert_eq!(h.caller.fail_pending("connection closed"), 1);
    assert_eq!(h.caller.active_calls(), 0);
    assert!(h.caller_sink.take().is_empty());

    // The response is discarded instead of being treated as an unknown id.
    let response = CallResponse::ok().into_frame(90).unwrap();
    let outcome = callee.relay.relay_frame(response).unwrap();
    assert_eq!(outcome, RelayOutcome::Dropped);
    assert_eq!(callee.relay.active_calls(), 0);
}
