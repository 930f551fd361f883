use envconfig::Envconfig;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ProxyError;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Default log level when RUST_LOG is not set
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Root URL of the upstream crime-data provider
    #[envconfig(from = "CRIME_API_BASE_URL", default = "https://api.crime-data.io/v1")]
    pub upstream_base_url: String,

    /// Window shared by every rate-limit tier, in milliseconds
    #[envconfig(from = "RATE_LIMIT_WINDOW_MS", default = "900000")]
    pub rate_limit_window_ms: u64,

    /// Requests allowed per window on the general tier
    #[envconfig(from = "RATE_LIMIT_MAX_REQUESTS", default = "100")]
    pub rate_limit_max_requests: u32,

    /// Per-attempt timeout for upstream calls
    #[envconfig(from = "REQUEST_TIMEOUT_MS", default = "8000")]
    pub request_timeout_ms: u64,

    /// Retries after the first upstream attempt
    #[envconfig(from = "MAX_RETRIES", default = "3")]
    pub max_retries: u32,

    #[envconfig(from = "RETRY_BASE_DELAY_MS", default = "200")]
    pub retry_base_delay_ms: u64,

    #[envconfig(from = "RETRY_MAX_DELAY_MS", default = "3000")]
    pub retry_max_delay_ms: u64,

    /// Simulate network latency in the mock backend
    #[envconfig(from = "MOCK_LATENCY", default = "true")]
    pub mock_latency: bool,

    /// Redis connection URL; counters stay in memory when unset
    #[envconfig(from = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Key clients on X-Forwarded-For / X-Real-IP instead of the socket
    /// peer. Only enable behind a proxy that overwrites those headers.
    #[envconfig(from = "TRUST_PROXY_HEADERS", default = "false")]
    pub trust_proxy_headers: bool,

    /// Expired counter cleanup interval in seconds
    #[envconfig(from = "CLEANUP_INTERVAL", default = "300")]
    pub cleanup_interval_secs: u64,
}

/// Settings that are re-read on every request so that a rotated key or a
/// mode switch is picked up without a restart.
#[derive(Debug, Envconfig, Clone)]
pub struct ModeEnv {
    #[envconfig(from = "CRIME_API_MODE", default = "mock")]
    pub mode: String,

    #[envconfig(from = "CRIME_API_KEY", default = "")]
    pub api_key: String,

    #[envconfig(from = "APP_ENV", default = "development")]
    pub environment: String,

    #[envconfig(from = "CI", default = "false")]
    pub ci: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    /// Check the rate-limit and retry settings for values that would make
    /// a tier unusable or the backoff nonsensical.
    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.rate_limit_window_ms == 0 {
            return Err(ProxyError::Configuration(
                "RATE_LIMIT_WINDOW_MS must be greater than 0".to_string(),
            ));
        }

        // The detail tier gets a quarter of the general budget.
        if self.rate_limit_max_requests < 4 {
            return Err(ProxyError::Configuration(
                "RATE_LIMIT_MAX_REQUESTS must be at least 4".to_string(),
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(ProxyError::Configuration(
                "REQUEST_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ProxyError::Configuration(format!(
                "RETRY_BASE_DELAY_MS ({}) cannot exceed RETRY_MAX_DELAY_MS ({})",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            )));
        }

        if self.upstream_base_url.trim().is_empty() {
            return Err(ProxyError::Configuration(
                "CRIME_API_BASE_URL cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Redis URL, if one is configured and non-blank
    pub fn redis_url(&self) -> Option<&str> {
        self.redis_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}
