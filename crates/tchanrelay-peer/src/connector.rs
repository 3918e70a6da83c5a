use tchanrelay_frame::{FrameConfig, FrameReader, FrameWriter};
use tchanrelay_transport::{NetStream, TcpTransport};

use crate::channel::ChannelConfig;
use crate::error::Result;
use crate::handshake::{handshake_client, handshake_server, HandshakeResult, EPHEMERAL_HOST_PORT};

/// A stream that completed the init exchange.
pub struct Established {
    pub reader: FrameReader<NetStream>,
    pub writer: FrameWriter<NetStream>,
    pub remote: HandshakeResult,
}

impl std::fmt::Debug for Established {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Established")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

/// Connect to `host_port` as an ephemeral client using default configuration.
pub fn connect(host_port: &str) -> Result<Established> {
    connect_with_config(host_port, EPHEMERAL_HOST_PORT, &ChannelConfig::default())
}

/// Connect to `host_port`, announcing `local_host_port` in the init request.
pub fn connect_with_config(
    host_port: &str,
    local_host_port: &str,
    config: &ChannelConfig,
) -> Result<Established> {
    let stream = TcpTransport::connect(host_port, config.connect_timeout)?;
    let (mut reader, mut writer) = split(stream, config)?;
    let remote = handshake_client(&mut reader, &mut writer, local_host_port, &config.handshake)?;
    finish(reader, writer, remote, config)
}

/// Run the listener side of the init exchange on an accepted stream.
pub(crate) fn accept_stream(
    stream: NetStream,
    local_host_port: &str,
    config: &ChannelConfig,
) -> Result<Established> {
    let (mut reader, mut writer) = split(stream, config)?;
    let remote = handshake_server(&mut reader, &mut writer, local_host_port, &config.handshake)?;
    finish(reader, writer, remote, config)
}

fn split(
    stream: NetStream,
    config: &ChannelConfig,
) -> Result<(FrameReader<NetStream>, FrameWriter<NetStream>)> {
    let reader_stream = stream.try_clone()?;
    let handshake_frames = FrameConfig {
        read_timeout: Some(config.handshake.timeout),
        write_timeout: Some(config.handshake.timeout),
        ..config.frame.clone()
    };

    let reader = FrameReader::with_config_net(reader_stream, handshake_frames.clone())?;
    let writer = FrameWriter::with_config_net(stream, handshake_frames)?;
    Ok((reader, writer))
}

// The handshake runs under a deadline; restore runtime timeouts afterwards.
fn finish(
    mut reader: FrameReader<NetStream>,
    mut writer: FrameWriter<NetStream>,
    remote: HandshakeResult,
    config: &ChannelConfig,
) -> Result<Established> {
    reader.set_read_timeout(config.frame.read_timeout)?;
    writer.set_write_timeout(config.frame.write_timeout)?;
    Ok(Established {
        reader,
        writer,
        remote,
    })
}
