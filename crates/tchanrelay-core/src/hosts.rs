//! Service name to host:port directory with random peer selection.

use std::collections::HashMap;
use std::sync::RwLock;

use rand::Rng;

/// Keeps track of the hosts registered to each service.
///
/// Registration is append-only: duplicates are kept, so a host registered
/// twice is picked twice as often.
#[derive(Debug, Default)]
pub struct ServiceHosts {
    peers: RwLock<HashMap<String, Vec<String>>>,
}

impl ServiceHosts {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded with `(service, host_ports)` entries.
    pub fn from_entries<I, S, H>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<H>)>,
        S: Into<String>,
        H: Into<String>,
    {
        let hosts = Self::new();
        for (service, host_ports) in entries {
            let service = service.into();
            for host_port in host_ports {
                hosts.register(&service, host_port);
            }
        }
        hosts
    }

    /// Register a host:port for the given service.
    pub fn register(&self, service: &str, host_port: impl Into<String>) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers
            .entry(service.to_string())
            .or_default()
            .push(host_port.into());
    }

    /// Returns a uniformly random host:port for the service, or `None` if
    /// nothing is registered for it.
    pub fn get_host_port(&self, service: &str) -> Option<String> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        let host_ports = peers.get(service).filter(|hosts| !hosts.is_empty())?;
        let index = rand::thread_rng().gen_range(0..host_ports.len());
        Some(host_ports[index].clone())
    }

    /// Snapshot of the hosts registered for a service, in registration order.
    pub fn host_ports(&self, service: &str) -> Vec<String> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.get(service).cloned().unwrap_or_default()
    }

    /// Registered service names, sorted.
    pub fn services(&self) -> Vec<String> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        let mut services: Vec<String> = peers.keys().cloned().collect();
        services.sort_unstable();
        services
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
