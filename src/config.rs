//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::cache::CacheSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Time-series cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Index database path (default: `<cache_dir>/index.db`)
    #[serde(default)]
    pub cache_index: Option<String>,

    /// Eviction budget in megabytes
    #[serde(default = "default_cache_max_size")]
    pub cache_max_size: u64,

    /// Page writes between compaction checks
    #[serde(default = "default_inspect_interval")]
    pub cache_inspect_interval: u64,

    /// Samples per cached page
    #[serde(default = "default_page_size")]
    pub ts_page_size: u64,

    #[serde(default = "default_index_timeout")]
    pub index_timeout_secs: u64,
}

fn default_use_cache() -> bool {
    true
}

fn default_cache_dir() -> String {
    dirs::home_dir()
        .map(|p| p.join(".pennsieve").join("cache").to_string_lossy().to_string())
        .unwrap_or_else(|| "./.pennsieve/cache".to_string())
}

fn default_cache_max_size() -> u64 {
    2048 // MB
}

fn default_inspect_interval() -> u64 {
    1000
}

fn default_page_size() -> u64 {
    3600
}

fn default_index_timeout() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            use_cache: default_use_cache(),
            cache_dir: default_cache_dir(),
            cache_index: None,
            cache_max_size: default_cache_max_size(),
            cache_inspect_interval: default_inspect_interval(),
            ts_page_size: default_page_size(),
            index_timeout_secs: default_index_timeout(),
        }
    }
}

impl CacheConfig {
    /// Resolved index database path
    pub fn index_path(&self) -> PathBuf {
        match &self.cache_index {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.cache_dir).join("index.db"),
        }
    }

    /// Eviction budget in bytes
    pub fn max_bytes(&self) -> u64 {
        self.cache_max_size.saturating_mul(1024 * 1024)
    }
}

impl From<&CacheConfig> for CacheSettings {
    fn from(config: &CacheConfig) -> Self {
        CacheSettings {
            cache_dir: PathBuf::from(&config.cache_dir),
            cache_index: config.index_path(),
            max_bytes: config.max_bytes(),
            inspect_interval: config.cache_inspect_interval,
            page_size: config.ts_page_size,
            index_timeout: Duration::from_secs(config.index_timeout_secs),
            background_compaction: true,
        }
    }
}

/// Remote API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub api_host: String,

    /// Session token sent with streaming requests
    #[serde(default)]
    pub session_token: Option<String>,

    #[serde(default = "default_request_time")]
    pub max_request_time_secs: u64,

    #[serde(default = "default_timeout_retries")]
    pub max_request_timeout_retries: u32,
}

fn default_api_host() -> String {
    "https://api.pennsieve.io".to_string()
}

fn default_request_time() -> u64 {
    120
}

fn default_timeout_retries() -> u32 {
    2
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_host: default_api_host(),
            session_token: None,
            max_request_time_secs: default_request_time(),
            max_request_timeout_retries: default_timeout_retries(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("pennsieve").join("config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Settings consumed by the page cache
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings::from(&self.cache)
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Cache overrides
        if let Ok(dir) = std::env::var("PENNSIEVE_CACHE_LOC") {
            self.cache.cache_dir = dir;
        }
        if let Ok(index) = std::env::var("PENNSIEVE_CACHE_INDEX") {
            self.cache.cache_index = Some(index);
        }
        if let Some(size) = env_parse("PENNSIEVE_CACHE_MAX_SIZE") {
            self.cache.cache_max_size = size;
        }
        if let Some(every) = env_parse("PENNSIEVE_CACHE_INSPECT_EVERY") {
            self.cache.cache_inspect_interval = every;
        }
        if let Some(page_size) = env_parse("PENNSIEVE_TS_PAGE_SIZE") {
            self.cache.ts_page_size = page_size;
        }
        if let Some(flag) = env_parse::<u8>("PENNSIEVE_USE_CACHE") {
            self.cache.use_cache = flag != 0;
        }

        // API overrides
        if let Ok(host) = std::env::var("PENNSIEVE_API_HOST") {
            self.api.api_host = host;
        }
        if let Ok(token) = std::env::var("PENNSIEVE_SESSION_TOKEN") {
            self.api.session_token = Some(token);
        }

        // Logging overrides
        if let Ok(level) = std::env::var("PENNSIEVE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("PENNSIEVE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Pennsieve Client Configuration
#
# Environment variables override these settings:
# - PENNSIEVE_CACHE_LOC
# - PENNSIEVE_CACHE_INDEX
# - PENNSIEVE_CACHE_MAX_SIZE
# - PENNSIEVE_CACHE_INSPECT_EVERY
# - PENNSIEVE_TS_PAGE_SIZE
# - PENNSIEVE_USE_CACHE (0 or 1)
# - PENNSIEVE_API_HOST
# - PENNSIEVE_SESSION_TOKEN
# - PENNSIEVE_LOG_LEVEL
# - PENNSIEVE_LOG_FORMAT

[cache]
# Use the local time-series cache
use_cache = true

# Directory holding cached pages
cache_dir = "~/.pennsieve/cache"

# Index database (default: <cache_dir>/index.db)
# cache_index = "~/.pennsieve/cache/index.db"

# Maximum cache size (MB)
cache_max_size = 2048

# Page writes between compaction checks
cache_inspect_interval = 1000

# Samples per page. Fixed when a cache directory is first created.
ts_page_size = 3600

# Seconds to wait on a locked index before giving up
index_timeout_secs = 60

[api]
# Platform API host
api_host = "https://api.pennsieve.io"

# Request timeout in seconds
max_request_time_secs = 120

# Extra attempts after a timed-out request
max_request_timeout_retries = 2

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.cache.use_cache);
        assert_eq!(config.cache.ts_page_size, 3600);
        assert_eq!(config.cache.max_bytes(), 2048 * 1024 * 1024);
        assert!(config.cache.index_path().ends_with("index.db"));
    }

    #[test]
    fn test_default_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.cache.cache_inspect_interval, 1000);
        assert_eq!(config.api.max_request_timeout_retries, 2);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_huge_max_size_saturates() {
        let mut config = Config::default();
        config.cache.cache_max_size = u64::MAX;

        assert_eq!(config.cache.max_bytes(), u64::MAX);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[cache]\ncache_dir = \"/tmp/ts\"\ncache_max_size = 16\nts_page_size = 10\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        let settings = config.cache_settings();

        assert_eq!(settings.cache_dir, PathBuf::from("/tmp/ts"));
        assert_eq!(settings.cache_index, PathBuf::from("/tmp/ts/index.db"));
        assert_eq!(settings.max_bytes, 16 * 1024 * 1024);
        assert_eq!(settings.page_size, 10);
        assert_eq!(settings.inspect_interval, 1000);
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cache\nbroken").unwrap();

        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }
}
