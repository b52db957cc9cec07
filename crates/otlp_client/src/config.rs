//! Client configuration.
//!
//! Settings resolve with the precedence: explicit `with_*` call >
//! traces-specific environment variable > general environment variable >
//! default. Apply explicit options after [`ClientConfig::from_env`] to get
//! that ordering.

use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Errors raised while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The collector endpoint is empty.
    #[error("endpoint must not be empty")]
    EmptyEndpoint,

    /// Neither a dialer nor an external transport was supplied.
    #[error("no transport: supply a dialer or an external transport")]
    MissingTransport,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// When `false`, each upload makes exactly one attempt.
    pub enabled: bool,
    /// Delay before the first retry (before jitter).
    pub initial_interval: Duration,
    /// Cap on the exponentially growing delay.
    pub max_interval: Duration,
    /// Total time budget for one upload including waits. Zero retries forever.
    pub max_elapsed_time: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(30),
            max_elapsed_time: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Growth factor applied to the interval after every attempt.
    pub const MULTIPLIER: f64 = 1.5;

    /// A configuration that never retries.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Un-jittered delay before retry number `attempt` (0-indexed).
    ///
    /// Grows as `initial * 1.5^attempt`, capped at `max_interval`. Saturates
    /// instead of overflowing.
    pub fn interval_for_attempt(&self, attempt: u32) -> Duration {
        let cap = self.max_interval.as_nanos() as f64;
        let grown = self.initial_interval.as_nanos() as f64
            * Self::MULTIPLIER.powi(attempt.min(i32::MAX as u32) as i32);
        if !grown.is_finite() || grown >= cap {
            return self.max_interval;
        }
        if grown < u64::MAX as f64 {
            Duration::from_nanos(grown.round() as u64)
        } else {
            Duration::try_from_secs_f64(grown / 1e9).unwrap_or(self.max_interval)
        }
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_max_elapsed_time(mut self, elapsed: Duration) -> Self {
        self.max_elapsed_time = elapsed;
        self
    }
}

/// Payload compression requested from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

/// Resolved settings for one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Collector address, `host:port` optionally followed by a path.
    ///
    /// Default: `localhost:4317`
    pub endpoint: String,
    /// Use a plaintext connection.
    pub insecure: bool,
    /// Extra request headers sent with every export.
    pub headers: Vec<(String, String)>,
    pub compression: Compression,
    /// Per-upload timeout covering all attempts. Zero disables it.
    ///
    /// Default: 10s
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:4317".to_string(),
            insecure: false,
            headers: Vec::new(),
            compression: Compression::None,
            timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

const GENERAL_PREFIX: &str = "OTEL_EXPORTER_OTLP_";
const TRACES_PREFIX: &str = "OTEL_EXPORTER_OTLP_TRACES_";

impl ClientConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by values from `lookup`.
    ///
    /// Invalid values are skipped with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |suffix: &str| {
            lookup(&format!("{TRACES_PREFIX}{suffix}"))
                .or_else(|| lookup(&format!("{GENERAL_PREFIX}{suffix}")))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(raw) = get("ENDPOINT") {
            let (endpoint, insecure) = split_scheme(&raw);
            if endpoint.is_empty() {
                warn!(value = %raw, "ignoring empty OTLP endpoint");
            } else {
                config.endpoint = endpoint.to_string();
                if let Some(insecure) = insecure {
                    config.insecure = insecure;
                }
            }
        }

        if let Some(raw) = get("INSECURE") {
            match raw.to_ascii_lowercase().as_str() {
                "true" => config.insecure = true,
                "false" => config.insecure = false,
                _ => warn!(value = %raw, "ignoring invalid OTLP insecure flag"),
            }
        }

        if let Some(raw) = get("HEADERS") {
            config.headers = parse_headers(&raw);
        }

        if let Some(raw) = get("COMPRESSION") {
            match raw.to_ascii_lowercase().as_str() {
                "gzip" => config.compression = Compression::Gzip,
                "none" => config.compression = Compression::None,
                _ => warn!(value = %raw, "ignoring unsupported OTLP compression"),
            }
        }

        if let Some(raw) = get("TIMEOUT") {
            match raw.parse::<u64>() {
                Ok(ms) => config.timeout = Duration::from_millis(ms),
                Err(_) => warn!(value = %raw, "ignoring invalid OTLP timeout"),
            }
        }

        config
    }

    /// Checks the settings a client cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::EmptyEndpoint);
        }
        Ok(())
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Strips an `http://` or `https://` scheme, reporting the implied security.
fn split_scheme(raw: &str) -> (&str, Option<bool>) {
    if let Some(rest) = raw.strip_prefix("http://") {
        (rest.trim_end_matches('/'), Some(true))
    } else if let Some(rest) = raw.strip_prefix("https://") {
        (rest.trim_end_matches('/'), Some(false))
    } else {
        (raw.trim_end_matches('/'), None)
    }
}

/// Parses `k=v,k2=v2`, skipping malformed entries.
fn parse_headers(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Some((key.trim().to_string(), value.trim().to_string()))
            }
            _ => {
                warn!(entry = %entry, "ignoring malformed OTLP header");
                None
            }
        })
        .collect()
}
