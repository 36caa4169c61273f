//! Overlay session identity types.
//!
//! The directory never looks inside a session. It only needs an equality key
//! for ownership and the network the session's identity belongs to.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of an overlay session, compared by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh session identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an identifier handed out by the overlay layer.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The controller/network an identity authenticates to (e.g. its controller URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(String);

impl NetworkId {
    pub fn new(network: impl Into<String>) -> Self {
        Self(network.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NetworkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NetworkId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Handle supplied by the overlay-session collaborator when attaching services.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle {
    pub id: SessionId,
    pub network: NetworkId,
}

impl SessionHandle {
    pub fn new(id: SessionId, network: impl Into<NetworkId>) -> Self {
        Self { id, network: network.into() }
    }

    /// Create a handle with a freshly generated session id.
    pub fn generate(network: impl Into<NetworkId>) -> Self {
        Self::new(SessionId::new(), network)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn network(&self) -> &NetworkId {
        &self.network
    }
}
