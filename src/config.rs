//! Monitor Configuration
//!
//! Process-level settings with defaults and environment overrides.

use std::time::Duration;

use crate::stream::{FeedConfig, DEFAULT_FANOUT_PROBABILITY, DEFAULT_FEED_INTERVAL_MS};

/// Default Redis connection URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";

/// Default HTTP listen address for /healthz and /metrics
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Configuration for the monitor process
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Redis connection URL
    pub redis_url: String,
    /// HTTP listen address
    pub listen_addr: String,
    /// Delay between synthetic feed transactions in milliseconds
    pub feed_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            feed_interval_ms: DEFAULT_FEED_INTERVAL_MS,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from the environment, falling back to defaults
    ///
    /// Recognized variables: `REDIS_URL`, `LISTEN_ADDR`, `FEED_INTERVAL_MS`.
    /// An unparseable `FEED_INTERVAL_MS` falls back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            feed_interval_ms: std::env::var("FEED_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.feed_interval_ms),
        }
    }

    /// Feed settings derived from this configuration
    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            interval: Duration::from_millis(self.feed_interval_ms),
            fanout_probability: DEFAULT_FANOUT_PROBABILITY,
        }
    }
}
