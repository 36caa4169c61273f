//! Error types for the interception core.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::net::Ipv4Addr;
use thiserror::Error;

/// Result type alias for interception operations.
pub type Result<T> = std::result::Result<T, InterceptError>;

/// Main error type for the interception core.
#[derive(Error, Debug)]
pub enum InterceptError {
    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Allocation errors
    #[error("Address pool exhausted: no more addresses available in {network}/{prefix_len}")]
    AddressPoolExhausted { network: Ipv4Addr, prefix_len: u8 },

    // Registration errors
    #[error(transparent)]
    MappingConflict(#[from] MappingConflict),

    #[error("No intercepted service at {addr}:{port}")]
    ServiceNotFound { addr: Ipv4Addr, port: u16 },

    // I/O errors
    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Network error: {0}")]
    NetworkError(String),
}

/// A registration rejected because the hostname:port is already claimed.
///
/// The two variants are mutually exclusive; a network mismatch is reported
/// even when the service ids happen to coincide.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingConflict {
    #[error(
        "Service mapping conflict for service name {service_name}. {hostname}:{port} in {network} \
         is already mapped by another identity in {owner_network}"
    )]
    Network {
        service_name: String,
        hostname: String,
        port: u16,
        network: String,
        owner_network: String,
    },

    #[error(
        "Service mapping conflict for service name {service_name}. {hostname}:{port} \
         is already mapped by service id {owner_service_id}"
    )]
    Service { service_name: String, hostname: String, port: u16, owner_service_id: String },
}

impl MappingConflict {
    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MappingConflict::Network { .. } => "network",
            MappingConflict::Service { .. } => "service",
        }
    }
}

impl InterceptError {
    /// Wrap an I/O error with a short description of what was being done.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }
}
