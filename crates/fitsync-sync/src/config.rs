// ABOUTME: Configuration loading and validation for the fitsync sync engine.
// ABOUTME: Reads FITSYNC_* environment variables with defaults and rejects malformed values.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("FITSYNC_API_URL must start with http:// or https://: {0}")]
    InvalidApiUrl(String),

    #[error("{name} is not a valid non-negative integer: {value}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("FITSYNC_TIMEOUT_SECS must be greater than zero")]
    ZeroTimeout,
}

/// Sync engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub home: PathBuf,
    pub api_url: String,
    pub api_token: Option<String>,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub health_path: String,
    pub max_retries: u32,
    /// Zero disables lookup expiry.
    pub lookup_ttl: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            api_url: "http://127.0.0.1:8080".to_string(),
            api_token: None,
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(30),
            health_path: "/health".to_string(),
            max_retries: 5,
            lookup_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - FITSYNC_HOME: data directory (default: ~/.fitsync)
    /// - FITSYNC_API_URL: base URL of the REST backend (default: http://127.0.0.1:8080)
    /// - FITSYNC_API_TOKEN: bearer token sent with every request (optional)
    /// - FITSYNC_TIMEOUT_SECS: per-request timeout (default: 10)
    /// - FITSYNC_POLL_SECS: reachability poll interval (default: 30)
    /// - FITSYNC_HEALTH_PATH: path probed for reachability (default: /health)
    /// - FITSYNC_MAX_RETRIES: replay attempts before a failed entry is left alone (default: 5)
    /// - FITSYNC_LOOKUP_TTL_SECS: lifetime of cached search/barcode lookups, 0 = forever (default: 604800)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let home = std::env::var("FITSYNC_HOME")
            .map(PathBuf::from)
            .unwrap_or(defaults.home);

        let api_url = std::env::var("FITSYNC_API_URL").unwrap_or(defaults.api_url);
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError::InvalidApiUrl(api_url));
        }
        let api_url = api_url.trim_end_matches('/').to_string();

        let api_token = std::env::var("FITSYNC_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        let timeout_secs = env_u64("FITSYNC_TIMEOUT_SECS")?
            .unwrap_or(defaults.request_timeout.as_secs());
        if timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        let poll_secs = env_u64("FITSYNC_POLL_SECS")?
            .unwrap_or(defaults.poll_interval.as_secs())
            .max(1);

        let health_path = std::env::var("FITSYNC_HEALTH_PATH").unwrap_or(defaults.health_path);

        let max_retries = match env_u64("FITSYNC_MAX_RETRIES")? {
            Some(n) => u32::try_from(n).map_err(|_| ConfigError::InvalidNumber {
                name: "FITSYNC_MAX_RETRIES",
                value: n.to_string(),
            })?,
            None => defaults.max_retries,
        };

        let lookup_ttl = env_u64("FITSYNC_LOOKUP_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.lookup_ttl);

        Ok(Self {
            home,
            api_url,
            api_token,
            request_timeout: Duration::from_secs(timeout_secs),
            poll_interval: Duration::from_secs(poll_secs),
            health_path,
            max_retries,
            lookup_ttl,
        })
    }

    /// Location of the SQLite database inside the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.home.join("fitsync.db")
    }
}

fn default_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".fitsync")
}

fn env_u64(name: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serialize all tests that read/write env vars to prevent race conditions.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: [&str; 8] = [
        "FITSYNC_HOME",
        "FITSYNC_API_URL",
        "FITSYNC_API_TOKEN",
        "FITSYNC_TIMEOUT_SECS",
        "FITSYNC_POLL_SECS",
        "FITSYNC_HEALTH_PATH",
        "FITSYNC_MAX_RETRIES",
        "FITSYNC_LOOKUP_TTL_SECS",
    ];

    fn clear_env() {
        // SAFETY: test-only code, serialized by ENV_MUTEX
        unsafe {
            for var in VARS {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    fn config_loads_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let config = SyncConfig::from_env().unwrap();

        assert_eq!(config.api_url, "http://127.0.0.1:8080");
        assert!(config.api_token.is_none());
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.health_path, "/health");
        assert!(config.home.to_string_lossy().contains(".fitsync"));
        assert!(config.database_path().ends_with("fitsync.db"));
    }

    #[test]
    fn config_reads_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        // SAFETY: test-only code, serialized by ENV_MUTEX
        unsafe {
            std::env::set_var("FITSYNC_API_URL", "https://api.example.com/");
            std::env::set_var("FITSYNC_API_TOKEN", "secret");
            std::env::set_var("FITSYNC_TIMEOUT_SECS", "3");
            std::env::set_var("FITSYNC_LOOKUP_TTL_SECS", "0");
        }

        let config = SyncConfig::from_env();
        clear_env();
        let config = config.unwrap();

        assert_eq!(config.api_url, "https://api.example.com");
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(config.lookup_ttl, Duration::ZERO);
    }

    #[test]
    fn config_rejects_bad_values() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        // SAFETY: test-only code, serialized by ENV_MUTEX
        unsafe { std::env::set_var("FITSYNC_API_URL", "ftp://nope") };
        let err = SyncConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidApiUrl(_)));
        clear_env();

        // SAFETY: test-only code, serialized by ENV_MUTEX
        unsafe { std::env::set_var("FITSYNC_MAX_RETRIES", "lots") };
        let err = SyncConfig::from_env().unwrap_err();
        assert!(
            err.to_string().contains("FITSYNC_MAX_RETRIES"),
            "error should name the variable: {}",
            err
        );
        clear_env();

        // SAFETY: test-only code, serialized by ENV_MUTEX
        unsafe { std::env::set_var("FITSYNC_TIMEOUT_SECS", "0") };
        let err = SyncConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroTimeout));
        clear_env();
    }
}
