//! # Dead-Letter Stream
//!
//! Terminal sink for jobs that exceeded their retries or failed fatally.
//! Entries keep the full payload, the last error, and the attempt history
//! for human triage; nothing here is retried automatically.

use crate::pool::AttemptRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared_types::{Job, JobId, JobOptions};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::warn;

/// Upper bound on retained entries; the oldest are dropped beyond it.
pub const DEFAULT_DLQ_CAPACITY: usize = 10_000;

/// One dead-lettered job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// The job payload as it last ran.
    pub job: Job,
    /// Options the job was enqueued with.
    pub options: JobOptions,
    /// The error that terminated it.
    pub last_error: String,
    /// Every failed attempt, in order.
    pub attempt_errors: Vec<AttemptRecord>,
    /// When the job was dead-lettered.
    pub dead_lettered_at: DateTime<Utc>,
}

/// Append-only store of dead-lettered jobs.
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetterEntry>>,
    capacity: usize,
}

impl DeadLetterQueue {
    /// Create a stream with the default retention cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_DLQ_CAPACITY)
    }

    /// Create a stream retaining at most `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, dropping the oldest beyond capacity.
    pub fn append(&self, entry: DeadLetterEntry) {
        warn!(
            job_id = %entry.job.job_id,
            photo_id = %entry.job.photo_id,
            attempts = entry.job.attempts,
            error = %entry.last_error,
            "job dead-lettered"
        );
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Newest-first listing for triage, capped at `limit`.
    #[must_use]
    pub fn list(&self, limit: usize) -> Vec<DeadLetterEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Find an entry by job id.
    #[must_use]
    pub fn find(&self, job_id: &JobId) -> Option<DeadLetterEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().find(|e| &e.job.job_id == job_id).cloned()
    }

    /// Remove an entry (after manual triage). Returns it when present.
    pub fn remove(&self, job_id: &JobId) -> Option<DeadLetterEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let index = entries.iter().position(|e| &e.job.job_id == job_id)?;
        entries.remove(index)
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the stream is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new()
    }
}
