//! # Photon-Flow Service Binary
//!
//! Exit codes: `0` clean shutdown, `1` unrecoverable startup failure,
//! `2` forced shutdown after the drain budget expired.

use node_runtime::{PlatformConfig, PlatformRuntime, ShutdownOutcome};
use photon_telemetry::{init_logging, TelemetryConfig};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

/// Drain budget granted on ctrl-c before shutdown is forced.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> ExitCode {
    init_logging(&TelemetryConfig::from_env());

    let config = match PlatformConfig::from_env() {
        Ok(config) => config,
        Err(config_err) => {
            error!(%config_err, "invalid configuration");
            return ExitCode::from(1);
        }
    };

    info!(service = %config.service_name, "===========================");
    info!("  Photon-Flow Runtime v0.1.0");
    info!("===========================");

    let runtime = PlatformRuntime::build(config);
    if let Err(start_err) = runtime.start_all().await {
        error!(%start_err, "startup failed");
        return ExitCode::from(1);
    }

    info!("platform is running; ctrl-c to stop");
    if let Err(signal_err) = tokio::signal::ctrl_c().await {
        error!(%signal_err, "signal listener failed");
    }

    info!("shutdown signal received");
    match runtime.shutdown(DRAIN_TIMEOUT).await {
        ShutdownOutcome::Clean => ExitCode::SUCCESS,
        ShutdownOutcome::Forced => ExitCode::from(2),
    }
}
