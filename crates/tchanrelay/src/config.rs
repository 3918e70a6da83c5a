//! Service directory sources and argument parsing helpers.
//!
//! A hosts file is a JSON object mapping service names to host:port lists:
//!
//! ```json
//! { "users": ["10.0.0.1:4040", "10.0.0.2:4040"], "billing": ["10.0.1.1:4040"] }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tchanrelay_core::ServiceHosts;

use crate::exit::{CliError, CliResult, CONFIG_INVALID, USAGE};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostsConfig {
    pub services: BTreeMap<String, Vec<String>>,
}

impl HostsConfig {
    pub fn load(path: &Path) -> CliResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            CliError::new(
                CONFIG_INVALID,
                format!("cannot read hosts file {}: {err}", path.display()),
            )
        })?;
        Self::parse(&raw).map_err(|err| {
            CliError::new(
                CONFIG_INVALID,
                format!("invalid hosts file {}: {}", path.display(), err.message),
            )
        })
    }

    pub fn parse(raw: &str) -> CliResult<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|err| CliError::new(CONFIG_INVALID, err.to_string()))?;
        for (service, host_ports) in &config.services {
            if service.is_empty() {
                return Err(CliError::new(CONFIG_INVALID, "empty service name"));
            }
            if let Some(bad) = host_ports.iter().find(|hp| !looks_like_host_port(hp)) {
                return Err(CliError::new(
                    CONFIG_INVALID,
                    format!("service {service:?}: {bad:?} is not host:port"),
                ));
            }
        }
        Ok(config)
    }

    /// Append a `NAME=HOST:PORT` entry from the command line.
    pub fn add_service_arg(&mut self, arg: &str) -> CliResult<()> {
        let (service, host_port) = parse_service_arg(arg)?;
        self.services.entry(service).or_default().push(host_port);
        Ok(())
    }

    pub fn into_service_hosts(self) -> ServiceHosts {
        ServiceHosts::from_entries(self.services)
    }
}

/// Merge the optional hosts file with `NAME=HOST:PORT` arguments.
pub fn load_hosts(file: Option<&Path>, service_args: &[String]) -> CliResult<HostsConfig> {
    let mut config = match file {
        Some(path) => HostsConfig::load(path)?,
        None => HostsConfig::default(),
    };
    for arg in service_args {
        config.add_service_arg(arg)?;
    }
    Ok(config)
}

pub fn parse_service_arg(arg: &str) -> CliResult<(String, String)> {
    let (service, host_port) = arg
        .split_once('=')
        .ok_or_else(|| CliError::new(USAGE, format!("expected NAME=HOST:PORT, got {arg:?}")))?;
    let service = service.trim();
    let host_port = host_port.trim();
    if service.is_empty() {
        return Err(CliError::new(USAGE, format!("missing service name in {arg:?}")));
    }
    if !looks_like_host_port(host_port) {
        return Err(CliError::new(
            USAGE,
            format!("{host_port:?} is not host:port"),
        ));
    }
    Ok((service.to_string(), host_port.to_string()))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

fn looks_like_host_port(value: &str) -> bool {
    match value.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
