//! # Job - The Queue's View of Pending Work
//!
//! A `Job` is the durable representation of "process this photo". The queue
//! owns the right to process a photo; exactly one worker at a time converts
//! that right into an exclusive lease.

use crate::ids::{JobId, PhotoId, TraceId};
use crate::{DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY, HIGHEST_PRIORITY, LOWEST_PRIORITY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retention policy for terminal jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Keep the terminal entry indefinitely.
    Keep,
    /// Remove the entry as soon as it goes terminal.
    Remove,
    /// Keep at most the newest N terminal entries.
    Count(usize),
}

impl Default for Retention {
    fn default() -> Self {
        Self::Keep
    }
}

/// Backoff schedule applied between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BackoffPolicy {
    /// Constant delay between attempts.
    Fixed {
        /// Delay applied before every retry.
        base_ms: u64,
    },
    /// `base * factor^(attempts-1)`, capped.
    Exponential {
        /// First-retry delay.
        base_ms: u64,
        /// Multiplier per attempt.
        factor: f64,
        /// Upper bound on the computed delay.
        cap_ms: u64,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Exponential {
            base_ms: 1_000,
            factor: 2.0,
            cap_ms: 60_000,
        }
    }
}

impl BackoffPolicy {
    /// Delay to apply after the given (1-based) failed attempt.
    #[must_use]
    pub fn delay_after_attempt(&self, attempts: u32) -> Duration {
        let attempts = attempts.max(1);
        match *self {
            Self::Fixed { base_ms } => Duration::from_millis(base_ms),
            Self::Exponential {
                base_ms,
                factor,
                cap_ms,
            } => {
                let exp = factor.powi(attempts as i32 - 1);
                let raw = (base_ms as f64 * exp).min(cap_ms as f64);
                Duration::from_millis(raw as u64)
            }
        }
    }
}

/// Options supplied at enqueue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Priority, 1 (highest) .. 10 (lowest).
    pub priority: u8,
    /// Initial visibility delay.
    pub delay_ms: u64,
    /// Maximum delivery attempts before dead-lettering.
    pub max_attempts: u32,
    /// Retry backoff schedule.
    pub backoff: BackoffPolicy,
    /// Lease duration granted per claim.
    pub lease_ms: u64,
    /// Retention of completed entries.
    pub remove_on_complete: Retention,
    /// Retention of failed entries (the dead-letter stream keeps its own copy).
    pub remove_on_fail: Retention,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            delay_ms: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            lease_ms: 30_000,
            remove_on_complete: Retention::Keep,
            remove_on_fail: Retention::Keep,
        }
    }
}

impl JobOptions {
    /// Clamp the priority into the valid 1..=10 band.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.priority = self.priority.clamp(HIGHEST_PRIORITY, LOWEST_PRIORITY);
        self.max_attempts = self.max_attempts.max(1);
        self
    }
}

/// The queue entity describing pending processing work for one photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique id; producer-supplied ids deduplicate enqueues.
    pub job_id: JobId,
    /// The photo to process.
    pub photo_id: PhotoId,
    /// Where the original bytes live.
    pub blob_key: String,
    /// Blob-store partition of the original bytes.
    pub bucket: String,
    /// Which registered pipeline to run.
    pub pipeline_name: String,
    /// Stage names, in execution order, frozen at enqueue time.
    pub stages: Vec<String>,
    /// Priority, 1 (highest) .. 10 (lowest).
    pub priority: u8,
    /// Delivery attempts so far. Incremented on claim.
    pub attempts: u32,
    /// Maximum delivery attempts.
    pub max_attempts: u32,
    /// When the job was enqueued (FIFO tie-break within a priority).
    pub enqueued_at: DateTime<Utc>,
    /// Earliest time the job may be claimed.
    pub available_at: DateTime<Utc>,
    /// Trace id propagated from ingress.
    pub trace_id: TraceId,
}

impl Job {
    /// Build a job for a photo with the given options.
    #[must_use]
    pub fn for_photo(
        photo_id: PhotoId,
        blob_key: impl Into<String>,
        bucket: impl Into<String>,
        pipeline_name: impl Into<String>,
        stages: Vec<String>,
        options: &JobOptions,
        trace_id: TraceId,
        now: DateTime<Utc>,
    ) -> Self {
        let options = options.clone().normalized();
        Self {
            job_id: JobId::for_photo(&photo_id),
            photo_id,
            blob_key: blob_key.into(),
            bucket: bucket.into(),
            pipeline_name: pipeline_name.into(),
            stages,
            priority: options.priority,
            attempts: 0,
            max_attempts: options.max_attempts,
            enqueued_at: now,
            available_at: now + chrono::Duration::milliseconds(options.delay_ms as i64),
            trace_id,
        }
    }

    /// Whether another delivery attempt is allowed.
    #[must_use]
    pub fn attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }
}
