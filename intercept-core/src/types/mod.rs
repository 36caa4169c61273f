//! Core domain types for the interception directory.

pub mod hostname;
pub mod session;

// Re-exports
pub use hostname::{NormalizedName, ServiceKey};
pub use session::{NetworkId, SessionHandle, SessionId};
