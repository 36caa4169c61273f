//! Hostname normalization and the composite service key.

use serde::{Deserialize, Serialize};

/// A trimmed, lower-cased, fully-qualified (trailing-dot) hostname.
///
/// Only constructible through [`NormalizedName::new`], so every value held by
/// the registries is already normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedName(String);

impl NormalizedName {
    /// Normalize a hostname.
    ///
    /// `"Example.com"`, `"example.com."` and `" example.com "` all produce
    /// `"example.com."`. Normalizing an already normalized name is a no-op.
    pub fn new(name: &str) -> Self {
        let mut normalized = name.trim().to_lowercase();
        if !normalized.ends_with('.') {
            normalized.push('.');
        }
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name without its trailing dot, as a DNS question carries it.
    pub fn without_root(&self) -> &str {
        self.0.strip_suffix('.').unwrap_or(&self.0)
    }
}

impl std::fmt::Display for NormalizedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Key of a service mapping: normalized hostname plus intercepted port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub hostname: NormalizedName,
    pub port: u16,
}

impl ServiceKey {
    pub fn new(hostname: NormalizedName, port: u16) -> Self {
        Self { hostname, port }
    }
}

impl std::fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}
