//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging and the health surface.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name stamped on log lines and event sources.
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error).
    pub log_level: String,

    /// Whether to emit JSON-formatted logs (for log shippers).
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "photon-flow".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SERVICE_NAME`: Service name (default: photon-flow)
    /// - `LOG_LEVEL`: Level filter (default: info)
    /// - `LOG_JSON`: `1`/`true` switches to JSON log lines
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: env::var("SERVICE_NAME").unwrap_or(defaults.service_name),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            json_logs: env::var("LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.json_logs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "photon-flow");
        assert_eq!(config.log_level, "info");
        assert!(!config.json_logs);
    }
}
