//! Runtime configuration for the permission core.
//!
//! Loaded once at startup (programmatically or from a TOML file) and passed
//! by reference to the components that need it. There is no global settings
//! object.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};
use crate::principal::UserId;

/// Default username of the sentinel anonymous user.
pub const DEFAULT_ANONYMOUS_USER_NAME: &str = "AnonymousUser";

/// Configuration options recognized by warden-core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Username of the sentinel user that anonymous input resolves to.
    pub anonymous_user_name: String,
    /// Fixed id of the sentinel anonymous user, if pinned. Takes precedence
    /// over the username lookup.
    pub anonymous_user_id: Option<UserId>,
    /// Whether anonymous input is accepted at all. When false, resolving an
    /// anonymous marker is a hard rejection.
    pub anonymous_enabled: bool,
    /// When true, a checker never falls back to a per-object query for a key
    /// that was not prefetched; it reports no permissions instead. Callers
    /// must prefetch explicitly in this mode.
    pub auto_prefetch: bool,
    /// TTL for the process-wide anonymous-user cache, in seconds.
    /// 0 disables caching, -1 caches indefinitely, >0 caches for that long.
    pub anonymous_cache_ttl_secs: i64,
    /// Whether inactive users are stripped of all permissions.
    pub active_only: bool,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            anonymous_user_name: DEFAULT_ANONYMOUS_USER_NAME.to_string(),
            anonymous_user_id: None,
            anonymous_enabled: true,
            auto_prefetch: false,
            anonymous_cache_ttl_secs: 0,
            active_only: true,
        }
    }
}

impl WardenConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| WardenError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency of the loaded values.
    pub fn validate(&self) -> Result<()> {
        if self.anonymous_cache_ttl_secs < -1 {
            return Err(WardenError::Config(format!(
                "anonymous_cache_ttl_secs must be -1, 0 or positive (is {})",
                self.anonymous_cache_ttl_secs
            )));
        }
        if self.anonymous_user_name.is_empty() {
            return Err(WardenError::Config(
                "anonymous_user_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
