use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tchanrelay_core::InMemoryStats;
use tchanrelay_peer::{Channel, ChannelConfig, HandshakeConfig};
use tracing::{info, warn};

use crate::cmd::ServeArgs;
use crate::config::{load_hosts, parse_duration};
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_listening, OutputFormat};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let hosts = load_hosts(args.hosts.hosts.as_deref(), &args.hosts.services)?;
    let config = channel_config(&args)?;

    let hosts = Arc::new(hosts.into_service_hosts());
    let services = hosts.services();
    if services.is_empty() {
        warn!("no services registered, every call will be declined");
    }

    let stats = Arc::new(InMemoryStats::new());
    let channel = Channel::with_stats(config, hosts, stats.clone());
    let listener = channel
        .listen(&args.addr)
        .map_err(|err| CliError::context("listen failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    print_listening(&listener.local_addr().to_string(), &services, format);
    let served = listener.serve(&running);

    channel.close();
    for (counter, value) in stats.snapshot() {
        info!(%counter, value, "relay stats");
    }

    served.map_err(|err| CliError::context("accept failed", err))?;
    Ok(SUCCESS)
}

fn channel_config(args: &ServeArgs) -> CliResult<ChannelConfig> {
    let mut handshake = HandshakeConfig {
        timeout: parse_duration(&args.handshake_timeout)?,
        ..HandshakeConfig::default()
    };
    if let Some(name) = &args.process_name {
        handshake.process_name = name.clone();
    }

    Ok(ChannelConfig {
        connect_timeout: parse_duration(&args.connect_timeout)?,
        handshake,
        ..ChannelConfig::default()
    })
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
