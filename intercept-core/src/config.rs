//! Tunnel configuration.
//!
//! The address block the directory allocates from, and the values the local
//! network stack publishes for the virtual interface.

use crate::error::{InterceptError, Result};
use crate::network::pool::MAX_PREFIX_LEN;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

/// Persistent configuration for the interception tunnel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Interface address; its network (masked by `prefix_len`) is the pool
    pub ip: Ipv4Addr,
    pub prefix_len: u8,
    pub mtu: u16,
    /// Address the local DNS responder binds to
    pub dns_ip: Ipv4Addr,
    pub dns_port: u16,
    /// Resolvers for names that are not intercepted
    pub upstream_dns: Vec<IpAddr>,
    pub dns_ttl_secs: u32,
    pub log_level: String,
    /// Prometheus `/metrics` port; disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            ip: Ipv4Addr::new(100, 64, 0, 1),
            prefix_len: 24,
            mtu: u16::MAX,
            dns_ip: Ipv4Addr::new(100, 64, 0, 1),
            dns_port: 53,
            upstream_dns: Vec::new(),
            dns_ttl_secs: 60,
            log_level: "info".to_string(),
            metrics_port: None,
        }
    }
}

/// Interface summary handed to the network-stack collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TunIpInfo {
    pub ip: String,
    pub subnet: String,
    #[serde(rename = "MTU")]
    pub mtu: u16,
    #[serde(rename = "DNS")]
    pub dns: String,
}

impl TunnelConfig {
    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        paths::config_path()
    }

    /// Load configuration from the default location, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load and validate configuration from `path`.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| InterceptError::InvalidConfig {
            reason: format!("Failed to read config {}: {}", path.display(), e),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            InterceptError::InvalidConfig {
                reason: format!("Failed to parse config {}: {}", path.display(), e),
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| InterceptError::io(format!("creating {}", parent.display()), e))?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            InterceptError::InvalidConfig { reason: format!("Failed to serialize config: {}", e) }
        })?;
        std::fs::write(path, content)
            .map_err(|e| InterceptError::io(format!("writing {}", path.display()), e))
    }

    /// Reject values the directory or interface cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.prefix_len > MAX_PREFIX_LEN {
            return Err(InterceptError::InvalidConfig {
                reason: format!(
                    "prefix_len /{} leaves no allocatable addresses (maximum is /{})",
                    self.prefix_len, MAX_PREFIX_LEN
                ),
            });
        }
        if self.mtu == 0 {
            return Err(InterceptError::InvalidConfig { reason: "mtu must be non-zero".into() });
        }
        Ok(())
    }

    /// Subnet mask for `prefix_len`.
    pub fn netmask(&self) -> Ipv4Addr {
        let host_bits = 32u32.saturating_sub(u32::from(self.prefix_len));
        Ipv4Addr::from(u32::MAX.checked_shl(host_bits).unwrap_or(0))
    }

    pub fn tun_ip_info(&self) -> TunIpInfo {
        TunIpInfo {
            ip: self.ip.to_string(),
            subnet: self.netmask().to_string(),
            mtu: self.mtu,
            dns: self.dns_ip.to_string(),
        }
    }
}
