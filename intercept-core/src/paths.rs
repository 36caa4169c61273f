//! Centralized path configuration.
//!
//! The daemon and any tooling resolve their files through this module so
//! they agree on locations.

use std::path::PathBuf;

/// Get the configuration directory.
///
/// Resolution order:
/// 1. `INTERCEPT_CONFIG_DIR` environment variable
/// 2. `/etc/intercept` if it exists (system install)
/// 3. `~/.intercept` for user-only installs
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("INTERCEPT_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    let system_dir = PathBuf::from("/etc/intercept");
    if system_dir.exists() {
        return system_dir;
    }

    dirs::home_dir().map(|h| h.join(".intercept")).unwrap_or(system_dir)
}

/// Get the tunnel configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}
