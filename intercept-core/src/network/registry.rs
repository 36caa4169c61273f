//! Service registry: (hostname, port) → owning service registration.
//!
//! Each entry carries a reference count of the registrations relying on it.
//! An entry exists exactly while its count is at least one. Conflict rules
//! live in the directory; this registry only keeps the maps consistent.

use crate::types::{NetworkId, ServiceKey, SessionHandle, SessionId};
use serde::Serialize;
use std::collections::HashMap;
use std::time::SystemTime;
use tracing::debug;

/// Service registration tracked for a hostname:port.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceEntry {
    /// Session that created the mapping
    pub session: SessionHandle,
    /// Human readable service name (e.g., "api", "db-admin")
    pub service_name: String,
    /// Overlay service identifier
    pub service_id: String,
    /// Number of registrations currently relying on this mapping
    pub ref_count: u32,
    /// When the mapping was created
    pub created_at: SystemTime,
}

impl ServiceEntry {
    /// Create an entry with a reference count of one.
    pub fn new(session: SessionHandle, service_name: String, service_id: String) -> Self {
        Self { session, service_name, service_id, ref_count: 1, created_at: SystemTime::now() }
    }

    pub fn network(&self) -> &NetworkId {
        &self.session.network
    }
}

type OwnerKey = (SessionId, String);

/// Keyed service mappings with an owner index for teardown.
///
/// Teardown only knows the session and service name, so a secondary index
/// from `(session, name)` to keys avoids scanning every entry.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: HashMap<ServiceKey, ServiceEntry>,
    /// Keys in registration order per owner
    owners: HashMap<OwnerKey, Vec<ServiceKey>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &ServiceKey) -> Option<&ServiceEntry> {
        self.services.get(key)
    }

    /// Insert an entry, replacing any previous mapping for `key`.
    pub fn insert(&mut self, key: ServiceKey, entry: ServiceEntry) {
        if let Some(previous) = self.services.remove(&key) {
            self.unindex(&key, &previous);
        }
        self.owners
            .entry((entry.session.id, entry.service_name.clone()))
            .or_default()
            .push(key.clone());
        self.services.insert(key, entry);
    }

    /// Bump the count of an existing entry, or insert `entry` if absent.
    ///
    /// Returns the count after the operation.
    pub fn increment_or_insert(&mut self, key: ServiceKey, entry: ServiceEntry) -> u32 {
        if let Some(existing) = self.services.get_mut(&key) {
            existing.ref_count += 1;
            debug!(key = %key, ref_count = existing.ref_count, "Incremented service mapping");
            return existing.ref_count;
        }
        self.insert(key, entry);
        1
    }

    /// Drop one reference, removing the entry once nothing relies on it.
    ///
    /// Returns the remaining count (0 means the entry was removed), or `None`
    /// if `key` was not mapped.
    pub fn decrement_or_remove(&mut self, key: &ServiceKey) -> Option<u32> {
        let entry = self.services.get_mut(key)?;
        entry.ref_count = entry.ref_count.saturating_sub(1);
        let remaining = entry.ref_count;

        if remaining < 1 {
            self.remove(key);
        } else {
            debug!(key = %key, ref_count = remaining, "Decremented service mapping");
        }
        Some(remaining)
    }

    /// Remove an entry regardless of its count.
    pub fn remove(&mut self, key: &ServiceKey) -> Option<ServiceEntry> {
        let entry = self.services.remove(key)?;
        self.unindex(key, &entry);
        Some(entry)
    }

    /// The oldest mapping created by `session` under `service_name`.
    pub fn find_by_owner(&self, session: SessionId, service_name: &str) -> Option<&ServiceKey> {
        self.owners.get(&(session, service_name.to_string())).and_then(|keys| keys.first())
    }

    /// Every key whose mapping was created by `session`.
    pub fn keys_for_session(&self, session: SessionId) -> Vec<ServiceKey> {
        self.owners
            .iter()
            .filter(|((owner, _), _)| *owner == session)
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ServiceKey, &ServiceEntry)> {
        self.services.iter()
    }

    fn unindex(&mut self, key: &ServiceKey, entry: &ServiceEntry) {
        let owner = (entry.session.id, entry.service_name.clone());
        if let Some(keys) = self.owners.get_mut(&owner) {
            keys.retain(|k| k != key);
            if keys.is_empty() {
                self.owners.remove(&owner);
            }
        }
    }
}
