//! # Photon-Flow Node Runtime
//!
//! The composition root for the photo ingestion and processing platform.
//!
//! ## Architecture
//!
//! Subsystems never call each other directly; they communicate through the
//! shared bus and the job queue. The runtime wires concrete implementations
//! behind the component contracts:
//!
//! 1. Blob Store (reference in-memory adapter)
//! 2. Metadata Store (reference in-memory adapter)
//! 3. Job Queue (leases, retries, DLQ, recurring schedules)
//! 4. Ingress Coordinator
//! 5. Pipeline Engine
//! 6. Worker Pool
//! 7. Event Fabric / Room Router

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod runtime;

// Re-export main types
pub use config::{ConfigError, PlatformConfig};
pub use runtime::{PlatformRuntime, ShutdownOutcome};
