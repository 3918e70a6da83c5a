use tchanrelay_core::ServiceHosts;

use crate::cmd::ResolveArgs;
use crate::config::load_hosts;
use crate::exit::{CliResult, FAILURE, SUCCESS};
use crate::output::{print_resolutions, OutputFormat, Resolution};

/// Pick a host for each service the way the relay would.
///
/// Exits with `FAILURE` when a requested service has no hosts.
pub fn run(args: ResolveArgs, format: OutputFormat) -> CliResult<i32> {
    let hosts = load_hosts(args.hosts.hosts.as_deref(), &args.hosts.services)?
        .into_service_hosts();

    let services = if args.names.is_empty() {
        hosts.services()
    } else {
        args.names
    };

    let resolutions = resolve_all(&hosts, services);
    print_resolutions(&resolutions, format);

    if resolutions.iter().any(|r| r.host_port.is_none()) {
        return Ok(FAILURE);
    }
    Ok(SUCCESS)
}

fn resolve_all(hosts: &ServiceHosts, services: Vec<String>) -> Vec<Resolution> {
    services
        .into_iter()
        .map(|service| Resolution {
            host_port: hosts.get_host_port(&service),
            candidates: hosts.host_ports(&service).len(),
            service,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_and_reports_missing() {
        let hosts = ServiceHosts::from_entries([("users", vec!["10.0.0.1:4040", "10.0.0.2:4040"])]);
        let resolutions = resolve_all(&hosts, vec!["users".to_string(), "ghost".to_string()]);

        assert_eq!(resolutions.len(), 2);
        assert_eq!(resolutions[0].candidates, 2);
        let chosen = resolutions[0].host_port.as_deref().expect("users resolves");
        assert!(chosen == "10.0.0.1:4040" || chosen == "10.0.0.2:4040");

        assert_eq!(resolutions[1].service, "ghost");
        assert_eq!(resolutions[1].host_port, None);
        assert_eq!(resolutions[1].candidates, 0);
    }
}
