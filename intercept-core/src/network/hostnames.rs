//! Hostname registry: normalized hostname → virtual address and owner.
//!
//! Keeps a reverse index from address back to hostname so inbound
//! connections on a virtual address can be dispatched.

use crate::types::{NetworkId, NormalizedName, SessionId};
use serde::Serialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Owner and address bound to a hostname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostnameEntry {
    pub addr: Ipv4Addr,
    pub network: NetworkId,
    /// Session that first registered the hostname.
    pub session: SessionId,
}

/// Map of hostname → address, with the reverse address → hostname index.
#[derive(Debug, Default)]
pub struct HostnameRegistry {
    by_name: HashMap<NormalizedName, HostnameEntry>,
    by_addr: HashMap<Ipv4Addr, NormalizedName>,
}

impl HostnameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &NormalizedName) -> Option<&HostnameEntry> {
        self.by_name.get(name)
    }

    /// Insert a fresh entry.
    ///
    /// The caller must have checked that `name` is absent; the address must
    /// come straight from the pool, so it is never already indexed.
    pub fn insert(&mut self, name: NormalizedName, entry: HostnameEntry) {
        debug_assert!(!self.by_name.contains_key(&name), "hostname {} already mapped", name);
        debug_assert!(!self.by_addr.contains_key(&entry.addr), "address {} reused", entry.addr);
        self.by_addr.insert(entry.addr, name.clone());
        self.by_name.insert(name, entry);
    }

    /// Reverse lookup of the hostname owning a virtual address.
    pub fn hostname_for(&self, addr: Ipv4Addr) -> Option<&NormalizedName> {
        self.by_addr.get(&addr)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NormalizedName, &HostnameEntry)> {
        self.by_name.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(last_octet: u8, network: &str) -> HostnameEntry {
        HostnameEntry {
            addr: Ipv4Addr::new(100, 64, 0, last_octet),
            network: NetworkId::new(network),
            session: SessionId::new(),
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut registry = HostnameRegistry::new();
        let name = NormalizedName::new("api.internal");
        registry.insert(name.clone(), entry(2, "n1"));

        let found = registry.lookup(&NormalizedName::new("API.internal.")).unwrap();
        assert_eq!(found.addr, Ipv4Addr::new(100, 64, 0, 2));
        assert_eq!(found.network.as_str(), "n1");
        assert!(registry.lookup(&NormalizedName::new("db.internal")).is_none());
    }

    #[test]
    fn test_reverse_index() {
        let mut registry = HostnameRegistry::new();
        registry.insert(NormalizedName::new("a.internal"), entry(2, "n1"));
        registry.insert(NormalizedName::new("b.internal"), entry(3, "n1"));

        assert_eq!(
            registry.hostname_for(Ipv4Addr::new(100, 64, 0, 3)),
            Some(&NormalizedName::new("b.internal"))
        );
        assert!(registry.hostname_for(Ipv4Addr::new(100, 64, 0, 9)).is_none());
        assert_eq!(registry.len(), 2);
    }
}
