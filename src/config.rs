//! Configuration loading for heimdalld.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.heimdall/config.toml` (user)
//! 3. `/etc/heimdall/config.toml` (system)
//!
//! All durations are plain integers in the file: seconds for TTL, stale
//! time, and poll intervals; milliseconds for the slow-request timeout.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{ProxyError, Result};

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Per-path cache/polling policy. Paths not listed here fall back to
    /// the `[cache]` defaults and are never polled.
    #[serde(default, rename = "urls")]
    pub url_configs: Vec<UrlConfig>,
}

/// Upstream backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the upstream service (required).
    pub url: String,
    /// Maximum concurrent upstream requests (default: 2).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

fn default_max_concurrent() -> usize {
    2
}

/// Front-end listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Port to listen on (default: 8080).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Enable debug logging (default: false).
    #[serde(default)]
    pub debug: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            debug: false,
        }
    }
}

fn default_port() -> u16 {
    8080
}

/// Cache defaults applied to paths without an explicit [`UrlConfig`].
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Default entry TTL in seconds (default: 60).
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Default stale time in seconds (default: 30). Must not exceed the TTL.
    #[serde(default = "default_stale_secs")]
    pub default_stale_secs: u64,
    /// How long a client waits on a slow fetch before falling back to an
    /// expired entry, in milliseconds (default: 5000).
    #[serde(default = "default_slow_timeout_ms")]
    pub slow_request_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            default_stale_secs: default_stale_secs(),
            slow_request_timeout_ms: default_slow_timeout_ms(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    60
}

fn default_stale_secs() -> u64 {
    30
}

fn default_slow_timeout_ms() -> u64 {
    5000
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn default_stale_time(&self) -> Duration {
        Duration::from_secs(self.default_stale_secs)
    }

    pub fn slow_request_timeout(&self) -> Duration {
        Duration::from_millis(self.slow_request_timeout_ms)
    }
}

/// Built-in response validation policy.
///
/// Both lists name URL paths. A path in `require_json_object` must decode
/// to a JSON object to be cached; a path in `csv_paths` must be UTF-8 text
/// with at least [`MIN_CSV_COMMAS`](crate::cache::MIN_CSV_COMMAS) commas.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValidationConfig {
    #[serde(default)]
    pub require_json_object: Vec<String>,
    #[serde(default)]
    pub csv_paths: Vec<String>,
}

/// Per-path cache and polling policy.
///
/// Loaded once at startup and read-only thereafter. TTL and stale time are
/// snapshotted onto each entry at insertion, so edits require a restart to
/// affect existing entries.
#[derive(Debug, Clone, Deserialize)]
pub struct UrlConfig {
    /// URL path this policy applies to (exact match, no query string).
    pub path: String,
    /// Poll every N seconds; omitted or 0 disables polling.
    #[serde(default)]
    pub poll_interval_secs: u64,
    /// Entry TTL in seconds; falls back to the cache default.
    pub cache_ttl_secs: Option<u64>,
    /// Stale time in seconds; falls back to the cache default.
    pub stale_time_secs: Option<u64>,
}

impl UrlConfig {
    /// Whether the scheduler should poll this path.
    pub fn is_polled(&self) -> bool {
        self.poll_interval_secs > 0
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.heimdall/config.toml`
    /// 3. `/etc/heimdall/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        let content = fs::read_to_string(&path).map_err(|e| {
            ProxyError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            ProxyError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| ProxyError::Configuration(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(ProxyError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".heimdall").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/heimdall/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(ProxyError::Configuration(
            "No config file found. Create ~/.heimdall/config.toml or /etc/heimdall/config.toml"
                .to_string(),
        ))
    }

    /// Check cross-field invariants the deserializer cannot express.
    fn validate(&self) -> Result<()> {
        if self.backend.url.is_empty() {
            return Err(ProxyError::Configuration(
                "backend.url must not be empty".to_string(),
            ));
        }
        if self.backend.max_concurrent_requests == 0 {
            return Err(ProxyError::Configuration(
                "backend.max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.cache.default_stale_secs > self.cache.default_ttl_secs {
            return Err(ProxyError::Configuration(format!(
                "cache.default_stale_secs ({}) must not exceed cache.default_ttl_secs ({})",
                self.cache.default_stale_secs, self.cache.default_ttl_secs
            )));
        }
        for url in &self.url_configs {
            let ttl = url.cache_ttl_secs.unwrap_or(self.cache.default_ttl_secs);
            let stale = url
                .stale_time_secs
                .unwrap_or(self.cache.default_stale_secs);
            if stale > ttl {
                return Err(ProxyError::Configuration(format!(
                    "stale time ({stale}s) exceeds TTL ({ttl}s) for path '{}'",
                    url.path
                )));
            }
        }
        Ok(())
    }

    /// Look up the per-path policy for a URL path (exact match).
    pub fn url_config(&self, path: &str) -> Option<&UrlConfig> {
        self.url_configs.iter().find(|u| u.path == path)
    }

    /// Resolve the (ttl, stale_time) pair for a path, falling back to the
    /// cache defaults field by field.
    pub fn cache_policy(&self, path: &str) -> (Duration, Duration) {
        match self.url_config(path) {
            Some(u) => (
                Duration::from_secs(u.cache_ttl_secs.unwrap_or(self.cache.default_ttl_secs)),
                Duration::from_secs(u.stale_time_secs.unwrap_or(self.cache.default_stale_secs)),
            ),
            None => (self.cache.default_ttl(), self.cache.default_stale_time()),
        }
    }
}
