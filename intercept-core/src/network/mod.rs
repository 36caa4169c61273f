//! Virtual address allocation and service interception.
//!
//! Leaves first:
//! - [`pool`]: sequential addresses inside the tunnel CIDR block
//! - [`hostnames`]: hostname → address, with the reverse index
//! - [`registry`]: hostname:port → owning service, reference counted
//! - [`directory`]: the façade composing the three under one lock
//! - [`dns`]: local DNS responder answering from the directory
pub mod directory;
pub mod dns;
pub mod hostnames;
pub mod pool;
pub mod registry;

// Re-exports for commonly used types
pub use directory::{
    DirectoryStats, HostnameMapping, InterceptedService, InterceptionDirectory, ServiceMapping,
};
pub use dns::{DnsAction, DnsResponder};
pub use hostnames::{HostnameEntry, HostnameRegistry};
pub use pool::AddressPool;
pub use registry::{ServiceEntry, ServiceRegistry};
