//! Kernel configuration.
//!
//! All settings can be configured via environment variables:
//! - `MODORDER_RULES_URL`: community rules document URL
//! - `MODORDER_CACHE_DIR`: directory holding the cache record (default: `.modorder`)
//! - `MODORDER_CACHE_TTL_SECS`: cache time-to-live (default: 86400 = 24 h)
//! - `MODORDER_FETCH_TIMEOUT_SECS`: network timeout for a fetch (default: 30)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::rules::DEFAULT_CACHE_TTL_SECS;

/// Community rules database.
pub const DEFAULT_RULES_URL: &str =
    "https://raw.githubusercontent.com/RimSort/Community-Rules-Database/main/communityRules.json";

/// Default fetch timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Default cache directory, relative to the working directory.
pub const DEFAULT_CACHE_DIR: &str = ".modorder";

/// Runtime configuration for the rule cache and fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// URL of the remote rule document.
    pub rules_url: String,
    /// Directory the cache record is stored in.
    pub cache_dir: PathBuf,
    /// Cache time-to-live in seconds.
    pub cache_ttl_secs: u64,
    /// Bounded network timeout in seconds.
    pub fetch_timeout_secs: u64,
    /// User-Agent sent with fetch requests.
    pub user_agent: String,
}

impl KernelConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::defaults();
        Self {
            rules_url: std::env::var("MODORDER_RULES_URL").unwrap_or(defaults.rules_url),
            cache_dir: std::env::var("MODORDER_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            cache_ttl_secs: env_u64("MODORDER_CACHE_TTL_SECS").unwrap_or(defaults.cache_ttl_secs),
            fetch_timeout_secs: env_u64("MODORDER_FETCH_TIMEOUT_SECS")
                .unwrap_or(defaults.fetch_timeout_secs),
            user_agent: defaults.user_agent,
        }
    }

    /// Built-in defaults, ignoring the environment.
    pub fn defaults() -> Self {
        Self {
            rules_url: DEFAULT_RULES_URL.to_string(),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            user_agent: format!("modorder-kernel/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Fetch timeout as a `Duration`.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable numeric setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KernelConfig::default();
        assert_eq!(config.cache_ttl_secs, 86_400);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(config.rules_url, DEFAULT_RULES_URL);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: KernelConfig = serde_json::from_str(r#"{"cache_ttl_secs": 60}"#).unwrap();
        assert_eq!(config.cache_ttl_secs, 60);
        assert_eq!(config.fetch_timeout_secs, DEFAULT_FETCH_TIMEOUT_SECS);
    }
}
