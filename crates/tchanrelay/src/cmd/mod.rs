use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod info;
pub mod resolve;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay.
    Serve(ServeArgs),
    /// Show which host each service resolves to.
    Resolve(ResolveArgs),
    /// Handshake with a relay or service and print what it announces.
    Info(InfoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Resolve(args) => resolve::run(args, format),
        Command::Info(args) => info::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where the service directory comes from.
#[derive(Args, Debug, Default)]
pub struct HostsArgs {
    /// JSON file mapping service names to host:port lists.
    #[arg(long, value_name = "FILE", env = "TCHANRELAY_HOSTS")]
    pub hosts: Option<PathBuf>,
    /// Register a host for a service (repeatable).
    #[arg(long = "service", short = 's', value_name = "NAME=HOST:PORT")]
    pub services: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(default_value = "127.0.0.1:4040")]
    pub addr: String,
    #[command(flatten)]
    pub hosts: HostsArgs,
    /// Process name announced in init frames.
    #[arg(long)]
    pub process_name: Option<String>,
    /// Timeout for connecting to a peer (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub connect_timeout: String,
    /// Timeout for the init handshake (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub handshake_timeout: String,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Services to resolve. Default: every registered service.
    #[arg(value_name = "SERVICE")]
    pub names: Vec<String>,
    #[command(flatten)]
    pub hosts: HostsArgs,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Address of the relay or service.
    pub addr: String,
    /// Connect and handshake timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
