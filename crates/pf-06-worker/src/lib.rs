//! # Worker Pool - Queue Consumers for the Pipeline Engine
//!
//! Subsystem 6. Each worker binds N consumer tasks to the queue: claim one
//! job, hand it to the pipeline executor, settle the job from the outcome
//! (ack / retryable nack / fatal nack). Lifecycle:
//!
//! ```text
//! starting -> running <-> paused -> draining -> stopped
//! ```
//!
//! Draining stops new claims, waits out active jobs up to the shutdown
//! budget, then aborts the stragglers and nacks their jobs as retryable so
//! the queue hands them to another worker.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod pool;
pub mod worker;

// Re-export main types
pub use pool::WorkerPool;
pub use worker::{Worker, WorkerConfig, WorkerSnapshot, WorkerState};
