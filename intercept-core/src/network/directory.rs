//! Interception directory.
//!
//! Composes the address pool, hostname registry and service registry behind
//! one lock. Every public operation runs under that single guard, so the
//! check-then-act registration protocol cannot interleave with another
//! registration, a teardown, or a lookup.
//!
//! # Example
//!
//! ```
//! use intercept_core::network::InterceptionDirectory;
//! use intercept_core::types::SessionHandle;
//! use std::net::Ipv4Addr;
//!
//! # fn main() -> intercept_core::Result<()> {
//! let directory = InterceptionDirectory::new(Ipv4Addr::new(100, 64, 0, 0), 24)?;
//! let session = SessionHandle::generate("ctrl.example.net");
//!
//! let addr = directory.register_service("svc1", "api.internal", 443, &session, "api")?;
//! assert_eq!(addr, Ipv4Addr::new(100, 64, 0, 2));
//! assert_eq!(directory.resolve("API.internal."), Some(addr));
//! # Ok(())
//! # }
//! ```

use super::hostnames::{HostnameEntry, HostnameRegistry};
use super::pool::AddressPool;
use super::registry::{ServiceEntry, ServiceRegistry};
use crate::config::TunnelConfig;
use crate::error::{InterceptError, MappingConflict, Result};
use crate::types::{NetworkId, NormalizedName, ServiceKey, SessionHandle, SessionId};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use std::net::Ipv4Addr;
use tracing::{debug, info, instrument, warn};

/// Owner of an intercepted address:port, for inbound connection dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedService {
    pub session: SessionHandle,
    pub service_name: String,
    pub service_id: String,
    pub hostname: NormalizedName,
}

/// Point-in-time view of one service mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceMapping {
    pub hostname: NormalizedName,
    pub port: u16,
    pub addr: Ipv4Addr,
    pub network: NetworkId,
    pub session: SessionId,
    pub service_name: String,
    pub service_id: String,
    pub ref_count: u32,
}

/// Point-in-time view of one hostname mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostnameMapping {
    pub hostname: NormalizedName,
    pub addr: Ipv4Addr,
    pub network: NetworkId,
}

/// Directory counters for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DirectoryStats {
    pub hostnames: usize,
    pub services: usize,
    pub pool_capacity: usize,
    pub pool_allocated: usize,
}

#[derive(Debug, Default)]
struct DirectoryState {
    hostnames: HostnameRegistry,
    services: ServiceRegistry,
}

/// Assigns virtual addresses to intercepted hostnames and tracks which
/// overlay service owns each hostname:port.
///
/// Shared between flows as `Arc<InterceptionDirectory>`.
#[derive(Debug)]
pub struct InterceptionDirectory {
    pool: AddressPool,
    state: Mutex<DirectoryState>,
}

impl InterceptionDirectory {
    /// Create a directory allocating from `network/prefix_len`.
    ///
    /// # Errors
    ///
    /// Returns `InterceptError::InvalidConfig` if the block has no room for
    /// host addresses.
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        Ok(Self::with_pool(AddressPool::new(network, prefix_len)?))
    }

    /// Create a directory for the configured tunnel network.
    pub fn from_config(config: &TunnelConfig) -> Result<Self> {
        Self::new(config.ip, config.prefix_len)
    }

    pub fn with_pool(pool: AddressPool) -> Self {
        gauge!("intercept_pool_available").set(pool.remaining() as f64);
        Self { pool, state: Mutex::new(DirectoryState::default()) }
    }

    /// Register an intercepted hostname:port for an overlay service.
    ///
    /// Returns the virtual address the hostname resolves to. A previously
    /// unseen hostname gets a fresh address; a known hostname keeps its
    /// address, and a new port on it is accepted from any network.
    /// Registering the same hostname:port again under the same network and
    /// service id bumps its reference count.
    ///
    /// # Errors
    ///
    /// - `MappingConflict::Network` if the hostname:port is already mapped and the
    ///   hostname is owned by another network
    /// - `MappingConflict::Service` if the hostname:port is owned by another service id
    /// - `InterceptError::AddressPoolExhausted` if a new address is needed and none is left
    ///
    /// State is left untouched on every error.
    #[instrument(
        skip(self, session),
        fields(network = %session.network, session = %session.id)
    )]
    pub fn register_service(
        &self,
        service_id: &str,
        hostname: &str,
        port: u16,
        session: &SessionHandle,
        service_name: &str,
    ) -> Result<Ipv4Addr> {
        info!("Adding DNS entry for service {}@{}:{}", service_name, hostname, port);

        let name = NormalizedName::new(hostname);
        let key = ServiceKey::new(name.clone(), port);
        let network = session.network();
        let new_entry =
            || ServiceEntry::new(session.clone(), service_name.to_string(), service_id.to_string());

        let mut state = self.state.lock();
        let DirectoryState { hostnames, services } = &mut *state;

        let addr = match hostnames.lookup(&name) {
            None => {
                let addr = match self.pool.allocate() {
                    Ok(addr) => addr,
                    Err(e) => {
                        counter!("intercept_service_registrations_total", "result" => "exhausted")
                            .increment(1);
                        warn!("Cannot map hostname {}: {}", hostname, e);
                        return Err(e);
                    }
                };

                info!(addr = %addr, "Mapping hostname {} to {}", hostname, addr);
                hostnames.insert(
                    name,
                    HostnameEntry { addr, network: network.clone(), session: session.id },
                );
                services.insert(key, new_entry());
                counter!("intercept_hostnames_mapped_total").increment(1);
                addr
            }
            Some(host) => {
                let addr = host.addr;
                let owner_network = host.network.clone();

                let existing = services.lookup(&key).map(|entry| entry.service_id.clone());

                match existing {
                    None => {
                        debug!(addr = %addr, "Hostname {} already mapped, adding port {}", hostname, port);
                        services.insert(key, new_entry());
                    }
                    // The hostname's owning network decides, not the entry's.
                    Some(_) if owner_network != *network => {
                        return Err(Self::reject(MappingConflict::Network {
                            service_name: service_name.to_string(),
                            hostname: hostname.to_string(),
                            port,
                            network: network.to_string(),
                            owner_network: owner_network.to_string(),
                        }));
                    }
                    Some(owner_service_id) if owner_service_id != service_id => {
                        return Err(Self::reject(MappingConflict::Service {
                            service_name: service_name.to_string(),
                            hostname: hostname.to_string(),
                            port,
                            owner_service_id,
                        }));
                    }
                    Some(_) => {
                        let count = services.increment_or_insert(key, new_entry());
                        debug!(
                            "DNS mapping for {} used by another service. total services using {} = {}",
                            hostname, hostname, count
                        );
                    }
                }
                addr
            }
        };

        counter!("intercept_service_registrations_total", "result" => "success").increment(1);
        gauge!("intercept_services_active").set(services.len() as f64);
        Ok(addr)
    }

    /// Resolve a hostname to its virtual address.
    ///
    /// `None` means the hostname is not intercepted; whether that becomes
    /// NXDOMAIN or an upstream query is the DNS responder's decision.
    pub fn resolve(&self, hostname: &str) -> Option<Ipv4Addr> {
        let name = NormalizedName::new(hostname);
        let addr = self.state.lock().hostnames.lookup(&name).map(|entry| entry.addr);

        if addr.is_some() {
            counter!("intercept_resolve_total", "result" => "hit").increment(1);
        } else {
            counter!("intercept_resolve_total", "result" => "miss").increment(1);
        }
        addr
    }

    /// Release one registration made by `session` under `service_name`.
    ///
    /// The mapping is removed once its reference count drops to zero. The
    /// hostname keeps its address. Returns `false` if nothing matched, which
    /// is logged and otherwise ignored.
    #[instrument(skip(self, session), fields(session = %session))]
    pub fn deregister_service(&self, session: SessionId, service_name: &str) -> bool {
        let mut state = self.state.lock();

        let Some(key) = state.services.find_by_owner(session, service_name).cloned() else {
            warn!("No DNS mapping found for session {} and service {}", session, service_name);
            counter!("intercept_service_deregistrations_total", "result" => "not_found")
                .increment(1);
            return false;
        };

        match state.services.decrement_or_remove(&key) {
            Some(0) => {
                info!("Removing service named {} from DNS mapping known as {}", service_name, key)
            }
            Some(remaining) => debug!(
                "Cannot remove DNS mapping for {} yet, {} registrations still use {}",
                service_name, remaining, key
            ),
            None => return false,
        }

        counter!("intercept_service_deregistrations_total", "result" => "success").increment(1);
        gauge!("intercept_services_active").set(state.services.len() as f64);
        true
    }

    /// Drop every service mapping created by `session`, whatever its count.
    ///
    /// Used when an identity disconnects. Returns the number of mappings removed.
    #[instrument(skip(self, session), fields(session = %session))]
    pub fn deregister_session(&self, session: SessionId) -> usize {
        let mut state = self.state.lock();

        let keys = state.services.keys_for_session(session);
        for key in &keys {
            state.services.remove(key);
        }

        if keys.is_empty() {
            debug!("Session {} owned no DNS mappings", session);
        } else {
            info!("Removed {} DNS mappings for session {}", keys.len(), session);
        }
        gauge!("intercept_services_active").set(state.services.len() as f64);
        keys.len()
    }

    /// Find the service owning `addr:port`.
    ///
    /// # Errors
    ///
    /// Returns `InterceptError::ServiceNotFound` if the address is not a
    /// virtual address or nothing is registered on that port.
    pub fn get_service(&self, addr: Ipv4Addr, port: u16) -> Result<InterceptedService> {
        let state = self.state.lock();

        state
            .hostnames
            .hostname_for(addr)
            .and_then(|hostname| {
                let key = ServiceKey::new(hostname.clone(), port);
                state.services.lookup(&key).map(|entry| InterceptedService {
                    session: entry.session.clone(),
                    service_name: entry.service_name.clone(),
                    service_id: entry.service_id.clone(),
                    hostname: key.hostname,
                })
            })
            .ok_or(InterceptError::ServiceNotFound { addr, port })
    }

    /// Snapshot of all service mappings, ordered by hostname then port.
    pub fn services(&self) -> Vec<ServiceMapping> {
        let state = self.state.lock();

        let mut mappings: Vec<ServiceMapping> = state
            .services
            .iter()
            .filter_map(|(key, entry)| {
                let host = state.hostnames.lookup(&key.hostname)?;
                Some(ServiceMapping {
                    hostname: key.hostname.clone(),
                    port: key.port,
                    addr: host.addr,
                    network: entry.network().clone(),
                    session: entry.session.id,
                    service_name: entry.service_name.clone(),
                    service_id: entry.service_id.clone(),
                    ref_count: entry.ref_count,
                })
            })
            .collect();
        mappings.sort_by(|a, b| (&a.hostname, a.port).cmp(&(&b.hostname, b.port)));
        mappings
    }

    /// Snapshot of all hostname mappings, ordered by hostname.
    pub fn hostnames(&self) -> Vec<HostnameMapping> {
        let state = self.state.lock();

        let mut mappings: Vec<HostnameMapping> = state
            .hostnames
            .iter()
            .map(|(hostname, entry)| HostnameMapping {
                hostname: hostname.clone(),
                addr: entry.addr,
                network: entry.network.clone(),
            })
            .collect();
        mappings.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        mappings
    }

    pub fn stats(&self) -> DirectoryStats {
        let state = self.state.lock();
        DirectoryStats {
            hostnames: state.hostnames.len(),
            services: state.services.len(),
            pool_capacity: self.pool.capacity(),
            pool_allocated: self.pool.allocated(),
        }
    }

    pub fn pool(&self) -> &AddressPool {
        &self.pool
    }

    fn reject(conflict: MappingConflict) -> InterceptError {
        counter!("intercept_mapping_conflicts_total", "kind" => conflict.kind()).increment(1);
        counter!("intercept_service_registrations_total", "result" => "conflict").increment(1);
        warn!("{}", conflict);
        conflict.into()
    }
}
