use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use tchanrelay_frame::{
    ErrorCode, ErrorPayload, Frame, FrameError, FrameReader, FrameWriter, InitPayload,
    MessageType, INIT_HOST_PORT, INIT_PROCESS_NAME, INIT_VERSION,
};
use tracing::debug;

use crate::error::{PeerError, Result};

/// Message id used for the init exchange.
pub const HANDSHAKE_ID: u32 = 1;

/// Advertised by peers that do not accept inbound connections.
pub const EPHEMERAL_HOST_PORT: &str = "0.0.0.0:0";

const MAX_HOST_PORT_LEN: usize = 256;
const MAX_PROCESS_NAME_LEN: usize = 256;

/// Configuration for the init exchange.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Timeout for the whole exchange.
    pub timeout: Duration,
    /// Value of the `process_name` init header.
    pub process_name: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            process_name: format!("tchanrelay[{}]", std::process::id()),
        }
    }
}

/// What the remote announced during the init exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    /// The remote's advertised `host_port`.
    pub remote_host_port: String,
    /// The remote's advertised `process_name`.
    pub remote_process_name: String,
    pub version: u16,
}

impl HandshakeResult {
    /// Returns true if the remote does not accept inbound connections.
    pub fn is_ephemeral(&self) -> bool {
        self.remote_host_port == EPHEMERAL_HOST_PORT
    }
}

/// Send an init request announcing `local_host_port` and wait for the response.
pub fn handshake_client<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    local_host_port: &str,
    config: &HandshakeConfig,
) -> Result<HandshakeResult> {
    validate_local(local_host_port, &config.process_name)?;

    let req = InitPayload::new(local_host_port, &config.process_name)
        .into_frame(MessageType::InitReq, HANDSHAKE_ID)?;
    writer.write_frame(&req)?;

    let deadline = Instant::now() + config.timeout;
    let frame = recv_init_frame(reader, deadline, config.timeout)?;

    match frame.message_type() {
        MessageType::InitRes => {}
        MessageType::Error => {
            let ErrorPayload { code, message } = ErrorPayload::parse(&frame)?;
            return Err(PeerError::Rejected { code, message });
        }
        other => {
            return Err(PeerError::HandshakeFailed(format!(
                "expected init res, got {other}"
            )));
        }
    }
    if frame.id() != HANDSHAKE_ID {
        return Err(PeerError::HandshakeFailed(format!(
            "init res id {} does not match request id {HANDSHAKE_ID}",
            frame.id()
        )));
    }

    let result = validate_remote(&InitPayload::parse(&frame)?)?;
    debug!(
        remote = %result.remote_host_port,
        process = %result.remote_process_name,
        "init handshake complete"
    );
    Ok(result)
}

/// Wait for an init request and answer it, announcing `local_host_port`.
///
/// A bad init request is answered with a protocol error frame before the
/// error is returned.
pub fn handshake_server<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    local_host_port: &str,
    config: &HandshakeConfig,
) -> Result<HandshakeResult> {
    validate_local(local_host_port, &config.process_name)?;

    let deadline = Instant::now() + config.timeout;
    let frame = recv_init_frame(reader, deadline, config.timeout)?;
    let id = frame.id();

    if frame.message_type() != MessageType::InitReq {
        let err = PeerError::HandshakeFailed(format!(
            "expected init req, got {}",
            frame.message_type()
        ));
        reject(writer, id, &err);
        return Err(err);
    }

    let result = match InitPayload::parse(&frame)
        .map_err(PeerError::from)
        .and_then(|init| validate_remote(&init))
    {
        Ok(result) => result,
        Err(err) => {
            reject(writer, id, &err);
            return Err(err);
        }
    };

    let res = InitPayload::new(local_host_port, &config.process_name)
        .into_frame(MessageType::InitRes, id)?;
    writer.write_frame(&res)?;

    debug!(
        remote = %result.remote_host_port,
        process = %result.remote_process_name,
        "accepted init handshake"
    );
    Ok(result)
}

fn reject<W: Write>(writer: &mut FrameWriter<W>, id: u32, err: &PeerError) {
    let frame = Frame::error(id, ErrorCode::ProtocolError, &err.to_string());
    if let Err(write_err) = writer.write_frame(&frame) {
        debug!(error = %write_err, "failed to report handshake error");
    }
}

fn recv_init_frame<R: Read>(
    reader: &mut FrameReader<R>,
    deadline: Instant,
    timeout: Duration,
) -> Result<Frame> {
    loop {
        if Instant::now() >= deadline {
            return Err(PeerError::Timeout(timeout));
        }

        match reader.read_frame() {
            Ok(frame) => return Ok(frame),
            Err(FrameError::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(FrameError::ConnectionClosed) => {
                return Err(PeerError::Disconnected(
                    "connection closed during handshake".to_string(),
                ));
            }
            Err(err) => return Err(PeerError::Frame(err)),
        }
    }
}

fn validate_remote(init: &InitPayload) -> Result<HandshakeResult> {
    if init.version != INIT_VERSION {
        return Err(PeerError::HandshakeFailed(format!(
            "unsupported protocol version {} (expected {INIT_VERSION})",
            init.version
        )));
    }

    let host_port = required_header(init, INIT_HOST_PORT, MAX_HOST_PORT_LEN)?;
    let process_name = required_header(init, INIT_PROCESS_NAME, MAX_PROCESS_NAME_LEN)?;

    Ok(HandshakeResult {
        remote_host_port: host_port.to_string(),
        remote_process_name: process_name.to_string(),
        version: init.version,
    })
}

fn required_header<'a>(init: &'a InitPayload, key: &str, max_len: usize) -> Result<&'a str> {
    let value = init
        .header(key)
        .ok_or_else(|| PeerError::HandshakeFailed(format!("missing init header {key}")))?;
    validate_len(key, value, max_len)?;
    Ok(value)
}

fn validate_local(host_port: &str, process_name: &str) -> Result<()> {
    validate_len(INIT_HOST_PORT, host_port, MAX_HOST_PORT_LEN)?;
    validate_len(INIT_PROCESS_NAME, process_name, MAX_PROCESS_NAME_LEN)
}

fn validate_len(key: &str, value: &str, max_len: usize) -> Result<()> {
    if value.is_empty() || value.len() > max_len {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid {key} length: {}",
            value.len()
        )));
    }
    Ok(())
}
