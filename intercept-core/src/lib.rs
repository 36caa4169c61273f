//! Interception core library.
//!
//! Assigns stable virtual IPv4 addresses to hostnames intercepted from an
//! overlay network, tracks which overlay service owns each hostname:port,
//! and answers local DNS queries for them.

pub mod config;
pub mod error;
pub mod network;
pub mod observability;
pub mod paths;
pub mod types;

// Re-export commonly used items
pub use config::{TunIpInfo, TunnelConfig};
pub use error::{InterceptError, MappingConflict, Result};
pub use network::{AddressPool, DnsResponder, InterceptedService, InterceptionDirectory};
pub use observability::init as init_observability;
pub use types::{NetworkId, NormalizedName, ServiceKey, SessionHandle, SessionId};
