use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::CachePolicy;
use crate::error::{PermsError, PermsResult};

/// Configuration for permission resolution.
///
/// Read from the top level of a TOML file:
///
/// ```toml
/// cache_enabled = true
/// cache_ttl_secs = 3600
/// single_asset_to_ungroup_node = true
/// default_cache_policy = "read-through"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PermsConfig {
    /// Master switch for the resolution cache. When false every resolution bypasses it.
    pub cache_enabled: bool,
    /// Lifetime of a cached user tree in seconds (default: 24h).
    pub cache_ttl_secs: u64,
    /// Bulk invalidations closer together than this are coalesced (default: 60s).
    pub expire_debounce_secs: u64,
    /// Put individually granted assets into one synthetic "ungrouped" node
    /// instead of their catalog node.
    pub single_asset_to_ungroup_node: bool,
    /// Include rules granted to a user's groups when resolving a user.
    pub include_group_rules: bool,
    /// Cache policy used when a caller does not pick one.
    pub default_cache_policy: CachePolicy,
}

impl Default for PermsConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_secs: 86400,     // 24h
            expire_debounce_secs: 60,  // 1 min
            single_asset_to_ungroup_node: false,
            include_group_rules: true,
            default_cache_policy: CachePolicy::Bypass,
        }
    }
}

impl PermsConfig {
    /// Load config from disk, or return defaults if the file doesn't exist.
    pub fn load(path: &Path) -> PermsResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| PermsError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse config from a TOML string. Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> PermsResult<Self> {
        toml::from_str(content).map_err(|e| PermsError::Config(e.to_string()))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn expire_debounce(&self) -> Duration {
        Duration::from_secs(self.expire_debounce_secs)
    }
}
