use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One service lookup as printed by `resolve`.
#[derive(Debug, Serialize)]
pub struct Resolution {
    pub service: String,
    /// The host a call would be relayed to, `None` when nothing is registered.
    pub host_port: Option<String>,
    pub candidates: usize,
}

#[derive(Serialize)]
struct ResolveOutput<'a> {
    resolutions: &'a [Resolution],
}

pub fn print_resolutions(resolutions: &[Resolution], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ResolveOutput { resolutions }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SERVICE", "HOST:PORT", "CANDIDATES"]);
            for resolution in resolutions {
                table.add_row(vec![
                    resolution.service.clone(),
                    resolution
                        .host_port
                        .clone()
                        .unwrap_or_else(|| "-".to_string()),
                    resolution.candidates.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for resolution in resolutions {
                println!(
                    "{} -> {} ({} candidates)",
                    resolution.service,
                    resolution.host_port.as_deref().unwrap_or("<none>"),
                    resolution.candidates
                );
            }
        }
    }
}

/// What `info` learned about a remote.
#[derive(Debug, Serialize)]
pub struct RemoteInfo {
    pub address: String,
    pub host_port: String,
    pub process_name: String,
    pub protocol_version: u16,
    pub ping_latency_ms: Option<f64>,
    pub connected: bool,
}

pub fn print_info(info: &RemoteInfo, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(info),
        OutputFormat::Table => {
            let latency = info
                .ping_latency_ms
                .map(|ms| format!("{ms:.2} ms"))
                .unwrap_or_else(|| "-".to_string());
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"])
                .add_row(vec!["address", info.address.as_str()])
                .add_row(vec!["host_port", info.host_port.as_str()])
                .add_row(vec!["process_name", info.process_name.as_str()])
                .add_row(vec![
                    "protocol_version".to_string(),
                    info.protocol_version.to_string(),
                ])
                .add_row(vec!["ping_latency".to_string(), latency]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} host_port={} process={} version={} ping={}",
                info.address,
                info.host_port,
                info.process_name,
                info.protocol_version,
                info.ping_latency_ms
                    .map(|ms| format!("{ms:.2}ms"))
                    .unwrap_or_else(|| "n/a".to_string())
            );
        }
    }
}

#[derive(Serialize)]
struct ListeningOutput<'a> {
    listening: &'a str,
    services: &'a [String],
}

/// Announce the bound address once the relay accepts connections.
pub fn print_listening(addr: &str, services: &[String], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ListeningOutput {
            listening: addr,
            services,
        }),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("relay listening on {addr} ({} services)", services.len());
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}
