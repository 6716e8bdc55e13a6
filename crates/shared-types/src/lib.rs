//! # Shared Types - Domain Entities for Photon-Flow
//!
//! Defines the entities that cross subsystem boundaries:
//!
//! - **Photo cluster**: `PhotoRecord`, `PhotoStatus`, `StageProgress`, `Artifact`
//! - **Queue cluster**: `Job`, `JobOptions`, `BackoffPolicy`, `Retention`
//! - **Event cluster**: `PhotoEvent`, `EventKind`, `EventMetadata`
//! - **Cross-cutting**: identifiers, the error taxonomy, the token-bucket
//!   rate limiter, and the `Component` lifecycle contract
//!
//! Subsystems never exchange their internal types directly; everything that
//! travels between them is defined here.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod component;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod job;
pub mod rate_limiter;
pub mod record;

// Re-export main types
pub use component::{Component, ComponentError, ComponentErrorKind, ComponentHealth, ComponentStatus};
pub use envelope::{EventKind, EventMetadata, PhotoEvent};
pub use errors::PlatformError;
pub use ids::{ClientId, JobId, PhotoId, SessionId, TraceId, UserId};
pub use job::{BackoffPolicy, Job, JobOptions, Retention};
pub use rate_limiter::RateLimiter;
pub use record::{Artifact, MediaType, PhotoRecord, PhotoStatus, StageProgress, StageState};

/// Default job priority (1 = highest, 10 = lowest).
pub const DEFAULT_PRIORITY: u8 = 5;

/// Highest (most urgent) job priority.
pub const HIGHEST_PRIORITY: u8 = 1;

/// Lowest (least urgent) job priority.
pub const LOWEST_PRIORITY: u8 = 10;

/// Default maximum delivery attempts before a job is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
