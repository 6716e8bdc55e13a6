//! # Job Queue - Durable Priority Queue with Leases
//!
//! Subsystem 3. Owns the right to process every accepted photo and hands it
//! to exactly one worker at a time.
//!
//! ## State machine (per job)
//!
//! ```text
//! waiting ──claim──▶ active ──ack──▶ completed (terminal)
//!    │                  │
//!    │                  ├──nack(retry, attempts < max)──▶ delayed ──▶ waiting
//!    │                  └──nack(retry, attempts ≥ max) or nack(fatal)──▶ failed ─▶ dead_letter
//!    └──delay──▶ delayed ──available_at reached──▶ waiting
//! ```
//!
//! Claims are priority-ordered (1 highest .. 10 lowest), FIFO within a
//! priority, and exclusive: a claimed job is invisible until its lease
//! expires or the worker acks/nacks. A janitor task returns expired leases
//! to `waiting` and promotes due delayed jobs. Terminal failures land in the
//! dead-letter stream with their full attempt history.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod dlq;
pub mod pool;
pub mod queue;
pub mod scheduler;

// Re-export main types
pub use dlq::{DeadLetterEntry, DeadLetterQueue};
pub use pool::{
    AttemptRecord, ClaimedJob, EnqueueOutcome, JobPool, JobState, NackOutcome, QueueConfig,
    QueueError, QueueStats, ReapOutcome,
};
pub use queue::JobQueue;
pub use scheduler::{RecurringScheduler, RecurringSpec};

/// Default lease duration granted on claim when the caller does not override.
pub const DEFAULT_LEASE_MS: u64 = 30_000;

/// Upper bound on accumulated lease time for one claim (base + extensions).
pub const DEFAULT_MAX_TOTAL_LEASE_MS: u64 = 10 * 60 * 1_000;
