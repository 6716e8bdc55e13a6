//! # Photon Telemetry
//!
//! Logging configuration and the aggregated health surface. Components
//! self-report [`shared_types::ComponentHealth`]; the runtime folds those
//! into a tree whose root status is the worst child status.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod health;
pub mod logging;

// Re-export main types
pub use config::TelemetryConfig;
pub use health::HealthTree;
pub use logging::init_logging;
