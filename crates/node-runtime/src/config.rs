//! # Platform Configuration
//!
//! Environment-variable configuration for the composition root. Every
//! recognized variable has a default suitable for single-node development;
//! validation failures are startup failures (exit code 1), never silent
//! fallbacks.

use std::env;
use thiserror::Error;

/// Errors from configuration loading.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was present but unparseable.
    #[error("invalid value for {name}: '{value}' ({reason})")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// The platform's resolved configuration.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Blob store endpoint host.
    pub blob_endpoint: String,
    /// Blob store port.
    pub blob_port: u16,
    /// Whether to reach the blob store over TLS.
    pub blob_use_tls: bool,
    /// Blob store access key (reference impl ignores it, adapters use it).
    pub blob_access_key: Option<String>,
    /// Blob store secret key.
    pub blob_secret_key: Option<String>,
    /// Metadata store path / DSN.
    pub metadata_path: String,
    /// Queue backend host.
    pub queue_host: String,
    /// Queue backend port.
    pub queue_port: u16,
    /// Optional queue backend password.
    pub queue_password: Option<String>,
    /// Event transport host.
    pub event_host: String,
    /// Event transport port.
    pub event_port: u16,
    /// Service name for logs and event sources.
    pub service_name: String,
    /// Consumer tasks per worker.
    pub worker_concurrency: usize,
    /// Per-stage timeout in milliseconds.
    pub stage_timeout_ms: u64,
    /// Claim lease in milliseconds.
    pub lease_ms: u64,
    /// Log level filter.
    pub log_level: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            blob_endpoint: "localhost".to_string(),
            blob_port: 9000,
            blob_use_tls: false,
            blob_access_key: None,
            blob_secret_key: None,
            metadata_path: "./data/metadata".to_string(),
            queue_host: "localhost".to_string(),
            queue_port: 6379,
            queue_password: None,
            event_host: "localhost".to_string(),
            event_port: 6379,
            service_name: "photon-flow".to_string(),
            worker_concurrency: 4,
            stage_timeout_ms: 30_000,
            lease_ms: 30_000,
            log_level: "info".to_string(),
        }
    }
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.parse::<T>().map_err(|parse_err| ConfigError::Invalid {
            name,
            value: raw,
            reason: parse_err.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn flag(name: &'static str, default: bool) -> bool {
    env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

impl PlatformConfig {
    /// Load from the environment.
    ///
    /// # Environment Variables
    ///
    /// `BLOB_ENDPOINT`, `BLOB_PORT`, `BLOB_USE_TLS`, `BLOB_ACCESS_KEY`,
    /// `BLOB_SECRET_KEY`, `METADATA_PATH`, `QUEUE_HOST`, `QUEUE_PORT`,
    /// `QUEUE_PASSWORD`, `EVENT_HOST`, `EVENT_PORT`, `SERVICE_NAME`,
    /// `WORKER_CONCURRENCY`, `STAGE_TIMEOUT_MS`, `LEASE_MS`, `LOG_LEVEL`.
    ///
    /// # Errors
    ///
    /// `Invalid` for unparseable numeric values or a zero concurrency.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            blob_endpoint: env::var("BLOB_ENDPOINT").unwrap_or(defaults.blob_endpoint),
            blob_port: parsed("BLOB_PORT", defaults.blob_port)?,
            blob_use_tls: flag("BLOB_USE_TLS", defaults.blob_use_tls),
            blob_access_key: env::var("BLOB_ACCESS_KEY").ok(),
            blob_secret_key: env::var("BLOB_SECRET_KEY").ok(),
            metadata_path: env::var("METADATA_PATH").unwrap_or(defaults.metadata_path),
            queue_host: env::var("QUEUE_HOST").unwrap_or(defaults.queue_host),
            queue_port: parsed("QUEUE_PORT", defaults.queue_port)?,
            queue_password: env::var("QUEUE_PASSWORD").ok(),
            event_host: env::var("EVENT_HOST").unwrap_or(defaults.event_host),
            event_port: parsed("EVENT_PORT", defaults.event_port)?,
            service_name: env::var("SERVICE_NAME").unwrap_or(defaults.service_name),
            worker_concurrency: parsed("WORKER_CONCURRENCY", defaults.worker_concurrency)?,
            stage_timeout_ms: parsed("STAGE_TIMEOUT_MS", defaults.stage_timeout_ms)?,
            lease_ms: parsed("LEASE_MS", defaults.lease_ms)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_concurrency == 0 {
            return Err(ConfigError::Invalid {
                name: "WORKER_CONCURRENCY",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.stage_timeout_ms == 0 || self.lease_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "STAGE_TIMEOUT_MS/LEASE_MS",
                value: "0".to_string(),
                reason: "timeouts must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Base URL rendered into presigned links.
    #[must_use]
    pub fn blob_base_url(&self) -> String {
        let scheme = if self.blob_use_tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.blob_endpoint, self.blob_port)
    }
}
