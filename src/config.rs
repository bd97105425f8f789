//! Gateway configuration from environment variables.
//!
//! All knobs use the `TASKGATE_` prefix. Invalid values are logged and
//! replaced with defaults rather than aborting startup.

use std::time::Duration;

use tracing::warn;

use crate::quota::QuotaConfig;
use crate::session::SessionConfig;

/// Runtime configuration for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Identity endpoint URL for credential verification.
    pub identity_url: String,
    /// Protocol engine dispatch URL.
    pub engine_url: String,
    /// Shared store URL; unset selects the in-process store.
    pub redis_url: Option<String>,
    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: usize,
    /// TTL for cached principal entries.
    pub auth_cache_ttl: Duration,
    /// Advertised sustained requests per window.
    pub rate_limit: u32,
    /// Hard ceiling on requests per trailing window.
    pub rate_burst: u32,
    /// Trailing quota window length.
    pub rate_window: Duration,
    /// Idle timeout for streamable sessions.
    pub idle_timeout: Duration,
    /// Idle timeout for event-stream sessions.
    pub stream_idle_timeout: Duration,
    /// Grace period before an orphaned session is terminated.
    pub orphan_grace: Duration,
    /// Session sweep interval.
    pub cleanup_interval: Duration,
    /// Wall-clock timeout for one request/response cycle.
    pub request_timeout: Duration,
    /// Keep-alive comment interval on open event streams.
    pub keep_alive_interval: Duration,
    /// Raw admin credentials exempt from quota (comma separated).
    pub admin_tokens: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            identity_url: "http://localhost:9100/verify".to_string(),
            engine_url: "http://localhost:9200/rpc".to_string(),
            redis_url: None,
            max_body_bytes: 1024 * 1024,
            auth_cache_ttl: Duration::from_secs(300),
            rate_limit: 60,
            rate_burst: 120,
            rate_window: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(300),
            stream_idle_timeout: Duration::from_secs(900),
            orphan_grace: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            keep_alive_interval: Duration::from_secs(15),
            admin_tokens: Vec::new(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(var = name, value = %raw, "Invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse(name, default.as_secs()))
}

impl GatewayConfig {
    /// Load configuration from `TASKGATE_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            identity_url: std::env::var("TASKGATE_IDENTITY_URL")
                .unwrap_or(defaults.identity_url),
            engine_url: std::env::var("TASKGATE_ENGINE_URL").unwrap_or(defaults.engine_url),
            redis_url: std::env::var("TASKGATE_REDIS_URL").ok(),
            max_body_bytes: env_parse("TASKGATE_MAX_BODY_BYTES", defaults.max_body_bytes),
            auth_cache_ttl: env_secs("TASKGATE_AUTH_CACHE_TTL_SECS", defaults.auth_cache_ttl),
            rate_limit: env_parse("TASKGATE_RATE_LIMIT", defaults.rate_limit),
            rate_burst: env_parse("TASKGATE_RATE_BURST", defaults.rate_burst),
            rate_window: env_secs("TASKGATE_RATE_WINDOW_SECS", defaults.rate_window),
            idle_timeout: env_secs("TASKGATE_IDLE_TIMEOUT_SECS", defaults.idle_timeout),
            stream_idle_timeout: env_secs(
                "TASKGATE_STREAM_IDLE_TIMEOUT_SECS",
                defaults.stream_idle_timeout,
            ),
            orphan_grace: env_secs("TASKGATE_ORPHAN_GRACE_SECS", defaults.orphan_grace),
            cleanup_interval: env_secs(
                "TASKGATE_CLEANUP_INTERVAL_SECS",
                defaults.cleanup_interval,
            ),
            request_timeout: env_secs("TASKGATE_REQUEST_TIMEOUT_SECS", defaults.request_timeout),
            keep_alive_interval: env_secs(
                "TASKGATE_KEEP_ALIVE_SECS",
                defaults.keep_alive_interval,
            ),
            admin_tokens: std::env::var("TASKGATE_ADMIN_TOKENS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub fn quota_config(&self) -> QuotaConfig {
        QuotaConfig {
            limit: self.rate_limit,
            burst: self.rate_burst,
            window: self.rate_window,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            idle_timeout: self.idle_timeout,
            stream_idle_timeout: self.stream_idle_timeout,
            orphan_grace: self.orphan_grace,
            cleanup_interval: self.cleanup_interval,
        }
    }
}
