//! Structured logging setup.
//!
//! One `tracing-subscriber` registry for the whole process. `LOG_LEVEL`
//! feeds an `EnvFilter`, so per-module directives
//! (`pf_03_job_queue=debug,info`) work the way operators expect.

use crate::config::TelemetryConfig;
use std::sync::Once;
use tracing::info;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the global tracing subscriber. Safe to call more than once;
/// later calls are no-ops so tests can initialize freely.
pub fn init_logging(config: &TelemetryConfig) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_new(&config.log_level)
            .unwrap_or_else(|_| EnvFilter::new("info"));
        if config.json_logs {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        } else {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
        info!(
            service = %config.service_name,
            level = %config.log_level,
            json = config.json_logs,
            "logging initialized"
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_safe() {
        let config = TelemetryConfig::default();
        init_logging(&config);
        init_logging(&config);
    }
}
