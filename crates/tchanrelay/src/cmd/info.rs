use std::time::{Duration, Instant};

use tchanrelay_frame::{Frame, FrameError, MessageType};
use tchanrelay_peer::{
    connect_with_config, ChannelConfig, Established, HandshakeConfig, EPHEMERAL_HOST_PORT,
};

use crate::cmd::InfoArgs;
use crate::config::parse_duration;
use crate::exit::{CliError, CliResult, SUCCESS};
use crate::output::{print_info, OutputFormat, RemoteInfo};

const PING_ID: u32 = 1;

pub fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let config = ChannelConfig {
        connect_timeout: timeout,
        handshake: HandshakeConfig {
            timeout,
            process_name: format!("tchanrelay-info[{}]", std::process::id()),
        },
        ..ChannelConfig::default()
    };

    let mut remote = connect_with_config(&args.addr, EPHEMERAL_HOST_PORT, &config)
        .map_err(|err| CliError::context("connect failed", err))?;
    remote
        .reader
        .set_read_timeout(Some(timeout))
        .map_err(|err| CliError::context("connect failed", err))?;

    let ping_latency_ms = ping(&mut remote)
        .ok()
        .map(|d| (d.as_secs_f64() * 1000.0 * 100.0).round() / 100.0);

    let info = RemoteInfo {
        address: args.addr,
        host_port: remote.remote.remote_host_port.clone(),
        process_name: remote.remote.remote_process_name.clone(),
        protocol_version: remote.remote.version,
        ping_latency_ms,
        connected: true,
    };
    print_info(&info, format);
    Ok(SUCCESS)
}

fn ping(remote: &mut Established) -> Result<Duration, FrameError> {
    let start = Instant::now();
    remote
        .writer
        .write_frame(&Frame::new(MessageType::PingReq, PING_ID, Vec::new()))?;
    loop {
        let frame = remote.reader.read_frame()?;
        if frame.message_type() == MessageType::PingRes && frame.id() == PING_ID {
            return Ok(start.elapsed());
        }
    }
}
