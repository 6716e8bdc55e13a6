//! # Job Pool - Priority Queue State Machine
//!
//! The synchronous core of the queue, wrapped by the async facade in
//! `queue.rs`. Multiple indices keep every operation cheap:
//!
//! - `entries`: O(1) lookup by job id
//! - `ready`: O(log n) claim ordering (priority, then enqueue FIFO)
//! - `delayed`: O(log n) promotion ordering (by `available_at`)
//! - `active`: the set of leased jobs the janitor scans
//!
//! Invariants:
//!
//! - a job id appears in at most one of `ready`/`delayed`/`active`
//! - `attempts` never exceeds `max_attempts` while the job can still be claimed
//! - a claim only ever hands out the highest-priority due job, FIFO within
//!   a priority
//! - dead-lettering removes the live queue entry; the dead-letter stream
//!   keeps the only copy

use crate::dlq::DeadLetterEntry;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use shared_types::{Job, JobId, JobOptions, Retention};
use std::collections::{BTreeSet, HashMap, VecDeque};
use thiserror::Error;

/// Errors from queue operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue backend transport is down. Retryable at the caller.
    #[error("queue backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Operation on a job the queue no longer tracks.
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// Concurrent racers or an operation invalid for the job's state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The consumer-side rate limiter is saturated.
    #[error("claim rate limiter saturated")]
    LimiterBusy,

    /// The queue has been stopped.
    #[error("queue closed")]
    Closed,
}

/// Lifecycle state of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Claimable as soon as a worker asks.
    Waiting,
    /// Invisible until `available_at`.
    Delayed,
    /// Leased to exactly one worker.
    Active,
    /// Acked successfully (terminal).
    Completed,
    /// Failed terminally; a copy lives in the dead-letter stream.
    Failed,
}

impl JobState {
    /// Terminal states accept no further transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One failed delivery attempt, retained for dead-letter triage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    /// What went wrong.
    pub error: String,
    /// When the attempt ended.
    pub at: DateTime<Utc>,
}

/// Result of an enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new job was created.
    Created(JobId),
    /// An identically-keyed job already exists in a non-terminal state;
    /// the enqueue was a no-op.
    Duplicate(JobId),
}

impl EnqueueOutcome {
    /// The id of the (new or existing) job.
    #[must_use]
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Created(id) | Self::Duplicate(id) => id,
        }
    }
}

/// Result of a nack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    /// The job was re-queued with backoff.
    Retried {
        /// When the job becomes claimable again.
        available_at: DateTime<Utc>,
    },
    /// The job failed terminally and was dead-lettered.
    DeadLettered,
}

/// What a janitor pass did with expired leases.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReapOutcome {
    /// Jobs returned to `waiting` for another claim.
    pub requeued: Vec<JobId>,
    /// Jobs whose expired claim exhausted their attempts.
    pub dead_lettered: Vec<DeadLetterEntry>,
}

/// A successfully claimed job and its lease.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    /// Snapshot of the job (attempts already incremented for this claim).
    pub job: Job,
    /// When the lease expires unless extended, acked, or nacked.
    pub lease_deadline: DateTime<Utc>,
}

/// Counter snapshot for the health surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs claimable right now.
    pub waiting: usize,
    /// Jobs waiting out a delay or backoff.
    pub delayed: usize,
    /// Jobs currently leased.
    pub active: usize,
    /// Terminal completed entries still retained.
    pub completed: usize,
    /// Terminal failed entries still retained.
    pub failed: usize,
    /// Total enqueues accepted (duplicates excluded).
    pub enqueued_total: u64,
    /// Total claims served.
    pub claims_total: u64,
    /// Total backoff retries scheduled.
    pub retried_total: u64,
    /// Total jobs dead-lettered.
    pub dead_lettered_total: u64,
    /// Total leases reaped by the janitor.
    pub stalled_reaped_total: u64,
    /// Whether claims are paused.
    pub paused: bool,
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Lease applied when the claimer does not specify one.
    pub default_lease_ms: u64,
    /// Bound on base lease + extensions for one claim.
    pub max_total_lease_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_lease_ms: crate::DEFAULT_LEASE_MS,
            max_total_lease_ms: crate::DEFAULT_MAX_TOTAL_LEASE_MS,
        }
    }
}

/// Claim ordering key: priority first, FIFO within a priority.
type ReadyKey = (u8, i64, u64, JobId);

/// Promotion ordering key: earliest `available_at` first.
type DelayedKey = (i64, u64, JobId);

struct JobEntry {
    job: Job,
    options: JobOptions,
    state: JobState,
    /// Monotonic enqueue sequence, FIFO tie-break inside one millisecond.
    seq: u64,
    lease_deadline: Option<DateTime<Utc>>,
    /// Accumulated lease for the current claim, bounding extensions.
    current_lease_ms: u64,
    last_error: Option<String>,
    attempt_errors: Vec<AttemptRecord>,
}

impl JobEntry {
    fn ready_key(&self) -> ReadyKey {
        (
            self.job.priority,
            self.job.enqueued_at.timestamp_millis(),
            self.seq,
            self.job.job_id.clone(),
        )
    }

    fn delayed_key(&self) -> DelayedKey {
        (
            self.job.available_at.timestamp_millis(),
            self.seq,
            self.job.job_id.clone(),
        )
    }
}

/// Job priority queue with multiple indices.
pub struct JobPool {
    config: QueueConfig,
    entries: HashMap<JobId, JobEntry>,
    ready: BTreeSet<ReadyKey>,
    delayed: BTreeSet<DelayedKey>,
    active: BTreeSet<JobId>,
    /// Completed ids in completion order, for `Retention::Count` pruning.
    completed_order: VecDeque<JobId>,
    /// Failed-but-retained ids in failure order, for `Retention::Count`.
    failed_order: VecDeque<JobId>,
    next_seq: u64,
    paused: bool,
    enqueued_total: u64,
    claims_total: u64,
    retried_total: u64,
    dead_lettered_total: u64,
    stalled_reaped_total: u64,
}

impl JobPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            ready: BTreeSet::new(),
            delayed: BTreeSet::new(),
            active: BTreeSet::new(),
            completed_order: VecDeque::new(),
            failed_order: VecDeque::new(),
            next_seq: 0,
            paused: false,
            enqueued_total: 0,
            claims_total: 0,
            retried_total: 0,
            dead_lettered_total: 0,
            stalled_reaped_total: 0,
        }
    }

    /// Number of tracked jobs (terminal retained entries included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// State of a tracked job.
    #[must_use]
    pub fn state_of(&self, job_id: &JobId) -> Option<JobState> {
        self.entries.get(job_id).map(|e| e.state)
    }

    /// Snapshot of a tracked job.
    #[must_use]
    pub fn job(&self, job_id: &JobId) -> Option<Job> {
        self.entries.get(job_id).map(|e| e.job.clone())
    }

    /// Stop issuing claims. Enqueues are still accepted.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume issuing claims.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Insert a job. An identically-keyed job in a non-terminal state makes
    /// this a no-op; a terminal entry with the same id is replaced.
    pub fn enqueue(&mut self, job: Job, options: JobOptions, now: DateTime<Utc>) -> EnqueueOutcome {
        let job_id = job.job_id.clone();
        if let Some(existing) = self.entries.get(&job_id) {
            if !existing.state.is_terminal() {
                return EnqueueOutcome::Duplicate(job_id);
            }
            self.drop_entry(&job_id);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let state = if job.available_at > now {
            JobState::Delayed
        } else {
            JobState::Waiting
        };
        let entry = JobEntry {
            job,
            options: options.normalized(),
            state,
            seq,
            lease_deadline: None,
            current_lease_ms: 0,
            last_error: None,
            attempt_errors: Vec::new(),
        };
        match state {
            JobState::Delayed => {
                self.delayed.insert(entry.delayed_key());
            }
            _ => {
                self.ready.insert(entry.ready_key());
            }
        }
        self.entries.insert(job_id.clone(), entry);
        self.enqueued_total += 1;
        EnqueueOutcome::Created(job_id)
    }

    /// Atomic insert of a batch: if any job collides with a tracked
    /// non-terminal job or with another batch entry, nothing is enqueued.
    pub fn enqueue_bulk(
        &mut self,
        batch: Vec<(Job, JobOptions)>,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, QueueError> {
        let mut seen = BTreeSet::new();
        for (job, _) in &batch {
            if !seen.insert(job.job_id.clone()) {
                return Err(QueueError::Conflict(format!(
                    "duplicate job id in batch: {}",
                    job.job_id
                )));
            }
            if let Some(existing) = self.entries.get(&job.job_id) {
                if !existing.state.is_terminal() {
                    return Err(QueueError::Conflict(format!(
                        "job already queued: {}",
                        job.job_id
                    )));
                }
            }
        }
        let mut ids = Vec::with_capacity(batch.len());
        for (job, options) in batch {
            ids.push(self.enqueue(job, options, now).job_id().clone());
        }
        Ok(ids)
    }

    /// Move every due delayed job to `waiting`. Returns how many moved.
    pub fn promote_due(&mut self, now: DateTime<Utc>) -> usize {
        let now_ms = now.timestamp_millis();
        let due: Vec<DelayedKey> = self
            .delayed
            .iter()
            .take_while(|(available_ms, _, _)| *available_ms <= now_ms)
            .cloned()
            .collect();
        for key in &due {
            self.delayed.remove(key);
            let entry = self
                .entries
                .get_mut(&key.2)
                .expect("delayed index entry must exist");
            entry.state = JobState::Waiting;
            let ready_key = entry.ready_key();
            self.ready.insert(ready_key);
        }
        due.len()
    }

    /// Atomically claim the highest-priority due job, if any.
    ///
    /// Increments `attempts`, moves the job to `active`, and records the
    /// lease deadline. Returns `None` while paused or empty.
    pub fn claim(&mut self, lease_ms: Option<u64>, now: DateTime<Utc>) -> Option<ClaimedJob> {
        if self.paused {
            return None;
        }
        self.promote_due(now);

        let key = self.ready.iter().next().cloned()?;
        self.ready.remove(&key);

        let entry = self
            .entries
            .get_mut(&key.3)
            .expect("ready index entry must exist");
        let lease_ms = lease_ms
            .unwrap_or(self.config.default_lease_ms)
            .min(self.config.max_total_lease_ms);
        entry.state = JobState::Active;
        entry.job.attempts += 1;
        entry.current_lease_ms = lease_ms;
        let deadline = now + ChronoDuration::milliseconds(lease_ms as i64);
        entry.lease_deadline = Some(deadline);
        self.active.insert(entry.job.job_id.clone());
        self.claims_total += 1;

        Some(ClaimedJob {
            job: entry.job.clone(),
            lease_deadline: deadline,
        })
    }

    /// Extend the lease of an active job.
    ///
    /// # Errors
    ///
    /// `JobNotFound` for untracked ids, `Conflict` when the job is not
    /// active or the total lease bound would be exceeded.
    pub fn extend_lease(
        &mut self,
        job_id: &JobId,
        additional_ms: u64,
        _now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, QueueError> {
        let entry = self
            .entries
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.clone()))?;
        if entry.state != JobState::Active {
            return Err(QueueError::Conflict(format!(
                "cannot extend lease of job {job_id} in state {:?}",
                entry.state
            )));
        }
        let total = entry.current_lease_ms.saturating_add(additional_ms);
        if total > self.config.max_total_lease_ms {
            return Err(QueueError::Conflict(format!(
                "lease extension exceeds {}ms cap",
                self.config.max_total_lease_ms
            )));
        }
        entry.current_lease_ms = total;
        let deadline = entry
            .lease_deadline
            .expect("active job has a lease deadline")
            + ChronoDuration::milliseconds(additional_ms as i64);
        entry.lease_deadline = Some(deadline);
        Ok(deadline)
    }

    /// Ack an active job as successfully completed.
    ///
    /// # Errors
    ///
    /// `JobNotFound` / `Conflict` as for [`JobPool::extend_lease`].
    pub fn ack(&mut self, job_id: &JobId, _now: DateTime<Utc>) -> Result<(), QueueError> {
        let entry = self
            .entries
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.clone()))?;
        if entry.state != JobState::Active {
            return Err(QueueError::Conflict(format!(
                "cannot ack job {job_id} in state {:?}",
                entry.state
            )));
        }
        entry.state = JobState::Completed;
        entry.lease_deadline = None;
        self.active.remove(job_id);

        match entry.options.remove_on_complete {
            Retention::Remove => {
                self.entries.remove(job_id);
            }
            Retention::Keep => {
                self.completed_order.push_back(job_id.clone());
            }
            Retention::Count(keep) => {
                self.completed_order.push_back(job_id.clone());
                while self.completed_order.len() > keep {
                    if let Some(old) = self.completed_order.pop_front() {
                        self.entries.remove(&old);
                    }
                }
            }
        }
        Ok(())
    }

    /// Nack an active job.
    ///
    /// Retryable failures with attempts remaining re-queue with backoff;
    /// fatal failures and exhausted retries dead-letter the job. In the
    /// dead-letter case the returned entry is the only remaining copy unless
    /// `remove_on_fail` retains a terminal stub.
    ///
    /// # Errors
    ///
    /// `JobNotFound` / `Conflict` as for [`JobPool::extend_lease`].
    pub fn nack(
        &mut self,
        job_id: &JobId,
        error: impl Into<String>,
        fatal: bool,
        now: DateTime<Utc>,
    ) -> Result<(NackOutcome, Option<DeadLetterEntry>), QueueError> {
        let entry = self
            .entries
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.clone()))?;
        if entry.state != JobState::Active {
            return Err(QueueError::Conflict(format!(
                "cannot nack job {job_id} in state {:?}",
                entry.state
            )));
        }

        let error = error.into();
        entry.attempt_errors.push(AttemptRecord {
            attempt: entry.job.attempts,
            error: error.clone(),
            at: now,
        });
        entry.last_error = Some(error.clone());
        entry.lease_deadline = None;
        self.active.remove(job_id);

        if !fatal && entry.job.attempts < entry.job.max_attempts {
            let delay = entry.options.backoff.delay_after_attempt(entry.job.attempts);
            entry.job.available_at =
                now + ChronoDuration::milliseconds(delay.as_millis() as i64);
            entry.state = JobState::Delayed;
            let key = entry.delayed_key();
            self.delayed.insert(key);
            self.retried_total += 1;
            return Ok((
                NackOutcome::Retried {
                    available_at: entry.job.available_at,
                },
                None,
            ));
        }

        // Terminal failure: the dead-letter stream takes the payload, the
        // attempt history, and the original options for triage.
        entry.state = JobState::Failed;
        self.dead_lettered_total += 1;
        let dead_letter = DeadLetterEntry {
            job: entry.job.clone(),
            options: entry.options.clone(),
            last_error: error,
            attempt_errors: entry.attempt_errors.clone(),
            dead_lettered_at: now,
        };

        match entry.options.remove_on_fail {
            Retention::Keep => {
                self.failed_order.push_back(job_id.clone());
            }
            Retention::Remove => {
                self.entries.remove(job_id);
            }
            Retention::Count(keep) => {
                self.failed_order.push_back(job_id.clone());
                while self.failed_order.len() > keep {
                    if let Some(old) = self.failed_order.pop_front() {
                        self.entries.remove(&old);
                    }
                }
            }
        }
        Ok((NackOutcome::DeadLettered, Some(dead_letter)))
    }

    /// Return every job whose lease expired to `waiting`, dead-lettering the
    /// ones whose expired claim was their last allowed attempt.
    ///
    /// Attempts are already counted at claim time, so a crashed worker's
    /// attempt is charged even though no nack ever arrives.
    pub fn reap_stalled(&mut self, now: DateTime<Utc>) -> ReapOutcome {
        let stalled: Vec<JobId> = self
            .active
            .iter()
            .filter(|job_id| {
                self.entries
                    .get(*job_id)
                    .and_then(|e| e.lease_deadline)
                    .map_or(false, |deadline| deadline < now)
            })
            .cloned()
            .collect();

        let mut outcome = ReapOutcome::default();
        for job_id in stalled {
            self.active.remove(&job_id);
            let entry = self
                .entries
                .get_mut(&job_id)
                .expect("active index entry must exist");
            entry.lease_deadline = None;
            entry.last_error = Some("lease expired".to_string());
            entry.attempt_errors.push(AttemptRecord {
                attempt: entry.job.attempts,
                error: "lease expired".to_string(),
                at: now,
            });
            self.stalled_reaped_total += 1;

            if entry.job.attempts >= entry.job.max_attempts {
                // The crashing claim was the last allowed attempt.
                entry.state = JobState::Failed;
                self.failed_order.push_back(job_id.clone());
                self.dead_lettered_total += 1;
                outcome.dead_lettered.push(DeadLetterEntry {
                    job: entry.job.clone(),
                    options: entry.options.clone(),
                    last_error: "lease expired".to_string(),
                    attempt_errors: entry.attempt_errors.clone(),
                    dead_lettered_at: now,
                });
            } else {
                entry.state = JobState::Waiting;
                let key = entry.ready_key();
                self.ready.insert(key);
                outcome.requeued.push(job_id);
            }
        }
        outcome
    }

    /// The earliest future `available_at`, for claim-wait scheduling.
    #[must_use]
    pub fn next_available_at(&self) -> Option<DateTime<Utc>> {
        self.delayed
            .iter()
            .next()
            .and_then(|(ms, _, _)| DateTime::<Utc>::from_timestamp_millis(*ms))
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let mut completed = 0;
        let mut failed = 0;
        for entry in self.entries.values() {
            match entry.state {
                JobState::Completed => completed += 1,
                JobState::Failed => failed += 1,
                _ => {}
            }
        }
        QueueStats {
            waiting: self.ready.len(),
            delayed: self.delayed.len(),
            active: self.active.len(),
            completed,
            failed,
            enqueued_total: self.enqueued_total,
            claims_total: self.claims_total,
            retried_total: self.retried_total,
            dead_lettered_total: self.dead_lettered_total,
            stalled_reaped_total: self.stalled_reaped_total,
            paused: self.paused,
        }
    }

    fn drop_entry(&mut self, job_id: &JobId) {
        if let Some(entry) = self.entries.remove(job_id) {
            self.ready.remove(&entry.ready_key());
            self.delayed.remove(&entry.delayed_key());
            self.active.remove(job_id);
            self.completed_order.retain(|id| id != job_id);
            self.failed_order.retain(|id| id != job_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{BackoffPolicy, PhotoId, TraceId};

    fn job_with(priority: u8, max_attempts: u32) -> (Job, JobOptions) {
        let options = JobOptions {
            priority,
            max_attempts,
            backoff: BackoffPolicy::Fixed { base_ms: 1_000 },
            ..JobOptions::default()
        };
        let job = Job::for_photo(
            PhotoId::generate(),
            "photos/k",
            "photos",
            "full_processing",
            vec!["validation".into()],
            &options,
            TraceId::generate(),
            Utc::now(),
        );
        (job, options)
    }

    fn pool() -> JobPool {
        JobPool::new(QueueConfig::default())
    }

    #[test]
    fn test_claim_priority_then_fifo() {
        let mut pool = pool();
        let now = Utc::now();

        let (low1, opts1) = job_with(5, 3);
        let (low2, opts2) = job_with(5, 3);
        let (high, opts3) = job_with(1, 3);
        let low1_id = low1.job_id.clone();
        let low2_id = low2.job_id.clone();
        let high_id = high.job_id.clone();

        pool.enqueue(low1, opts1, now);
        pool.enqueue(low2, opts2, now);
        pool.enqueue(high, opts3, now);

        assert_eq!(pool.claim(None, now).expect("claim").job.job_id, high_id);
        assert_eq!(pool.claim(None, now).expect("claim").job.job_id, low1_id);
        assert_eq!(pool.claim(None, now).expect("claim").job.job_id, low2_id);
        assert!(pool.claim(None, now).is_none());
    }

    #[test]
    fn test_priority_one_jumps_long_backlog() {
        let mut pool = pool();
        let now = Utc::now();
        for _ in 0..1_000 {
            let (job, opts) = job_with(5, 3);
            pool.enqueue(job, opts, now);
        }
        let (urgent, opts) = job_with(1, 3);
        let urgent_id = urgent.job_id.clone();
        pool.enqueue(urgent, opts, now);

        assert_eq!(pool.claim(None, now).expect("claim").job.job_id, urgent_id);
    }

    #[test]
    fn test_enqueue_idempotent_on_job_id() {
        let mut pool = pool();
        let now = Utc::now();
        let (job, opts) = job_with(5, 3);
        let job_id = job.job_id.clone();

        assert_eq!(
            pool.enqueue(job.clone(), opts.clone(), now),
            EnqueueOutcome::Created(job_id.clone())
        );
        assert_eq!(
            pool.enqueue(job, opts, now),
            EnqueueOutcome::Duplicate(job_id)
        );
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.stats().enqueued_total, 1);
    }

    #[test]
    fn test_delayed_job_invisible_until_due() {
        let mut pool = pool();
        let now = Utc::now();
        let (mut job, opts) = job_with(5, 3);
        job.available_at = now + ChronoDuration::milliseconds(5_000);
        pool.enqueue(job, opts, now);

        assert!(pool.claim(None, now).is_none());
        assert_eq!(pool.stats().delayed, 1);

        let later = now + ChronoDuration::milliseconds(5_001);
        assert!(pool.claim(None, later).is_some());
    }

    #[test]
    fn test_claim_increments_attempts_and_leases() {
        let mut pool = pool();
        let now = Utc::now();
        let (job, opts) = job_with(5, 3);
        pool.enqueue(job, opts, now);

        let claimed = pool.claim(Some(10_000), now).expect("claim");
        assert_eq!(claimed.job.attempts, 1);
        assert_eq!(
            claimed.lease_deadline,
            now + ChronoDuration::milliseconds(10_000)
        );
        assert_eq!(pool.state_of(&claimed.job.job_id), Some(JobState::Active));
    }

    #[test]
    fn test_ack_completes() {
        let mut pool = pool();
        let now = Utc::now();
        let (job, opts) = job_with(5, 3);
        pool.enqueue(job, opts, now);
        let claimed = pool.claim(None, now).expect("claim");

        pool.ack(&claimed.job.job_id, now).expect("ack");
        assert_eq!(
            pool.state_of(&claimed.job.job_id),
            Some(JobState::Completed)
        );
        // Double-ack conflicts.
        assert!(matches!(
            pool.ack(&claimed.job.job_id, now),
            Err(QueueError::Conflict(_))
        ));
    }

    #[test]
    fn test_nack_retry_applies_backoff() {
        let mut pool = pool();
        let now = Utc::now();
        let (job, opts) = job_with(5, 3);
        pool.enqueue(job, opts, now);
        let claimed = pool.claim(None, now).expect("claim");

        let (outcome, dead_letter) = pool
            .nack(&claimed.job.job_id, "blob fetch failed", false, now)
            .expect("nack");
        assert!(dead_letter.is_none());
        match outcome {
            NackOutcome::Retried { available_at } => {
                assert_eq!(available_at, now + ChronoDuration::milliseconds(1_000));
            }
            NackOutcome::DeadLettered => panic!("expected retry"),
        }
        assert_eq!(pool.state_of(&claimed.job.job_id), Some(JobState::Delayed));
    }

    #[test]
    fn test_retries_exhausted_dead_letters() {
        let mut pool = pool();
        let mut now = Utc::now();
        let (job, opts) = job_with(5, 2);
        let job_id = job.job_id.clone();
        pool.enqueue(job, opts, now);

        for attempt in 1..=2 {
            now += ChronoDuration::milliseconds(2_000);
            let claimed = pool.claim(None, now).expect("claim");
            assert_eq!(claimed.job.attempts, attempt);
            let (outcome, dead_letter) =
                pool.nack(&job_id, "still broken", false, now).expect("nack");
            if attempt < 2 {
                assert!(matches!(outcome, NackOutcome::Retried { .. }));
                assert!(dead_letter.is_none());
            } else {
                assert_eq!(outcome, NackOutcome::DeadLettered);
                let entry = dead_letter.expect("dead letter entry");
                assert_eq!(entry.attempt_errors.len(), 2);
                assert_eq!(entry.last_error, "still broken");
            }
        }
        // Never claimable again.
        assert!(pool.claim(None, now + ChronoDuration::days(1)).is_none());
    }

    #[test]
    fn test_fatal_nack_skips_retries() {
        let mut pool = pool();
        let now = Utc::now();
        let (job, opts) = job_with(5, 3);
        let job_id = job.job_id.clone();
        pool.enqueue(job, opts, now);
        pool.claim(None, now).expect("claim");

        let (outcome, dead_letter) = pool
            .nack(&job_id, "corrupt image", true, now)
            .expect("nack");
        assert_eq!(outcome, NackOutcome::DeadLettered);
        assert!(dead_letter.is_some());
    }

    #[test]
    fn test_reap_stalled_returns_to_waiting() {
        let mut pool = pool();
        let now = Utc::now();
        let (job, opts) = job_with(5, 3);
        let job_id = job.job_id.clone();
        pool.enqueue(job, opts, now);
        pool.claim(Some(1_000), now).expect("claim");

        // Before expiry nothing is reaped.
        assert!(pool.reap_stalled(now).requeued.is_empty());

        let later = now + ChronoDuration::milliseconds(1_500);
        let reaped = pool.reap_stalled(later);
        assert_eq!(reaped.requeued, vec![job_id.clone()]);
        assert!(reaped.dead_lettered.is_empty());
        assert_eq!(pool.state_of(&job_id), Some(JobState::Waiting));

        // The stalled attempt stays charged.
        let reclaimed = pool.claim(None, later).expect("claim");
        assert_eq!(reclaimed.job.attempts, 2);
    }

    #[test]
    fn test_extend_lease_bounded() {
        let mut pool = JobPool::new(QueueConfig {
            default_lease_ms: 1_000,
            max_total_lease_ms: 3_000,
        });
        let now = Utc::now();
        let (job, opts) = job_with(5, 3);
        let job_id = job.job_id.clone();
        pool.enqueue(job, opts, now);
        pool.claim(None, now).expect("claim");

        pool.extend_lease(&job_id, 1_500, now).expect("extend");
        assert!(matches!(
            pool.extend_lease(&job_id, 1_000, now),
            Err(QueueError::Conflict(_))
        ));
    }

    #[test]
    fn test_paused_queue_accepts_enqueues_refuses_claims() {
        let mut pool = pool();
        let now = Utc::now();
        pool.pause();
        let (job, opts) = job_with(5, 3);
        pool.enqueue(job, opts, now);

        assert!(pool.claim(None, now).is_none());
        pool.resume();
        assert!(pool.claim(None, now).is_some());
    }

    #[test]
    fn test_bulk_enqueue_all_or_nothing() {
        let mut pool = pool();
        let now = Utc::now();
        let (existing, opts) = job_with(5, 3);
        let dup = existing.clone();
        pool.enqueue(existing, opts.clone(), now);

        let (fresh, fresh_opts) = job_with(5, 3);
        let err = pool
            .enqueue_bulk(vec![(fresh, fresh_opts), (dup, opts)], now)
            .expect_err("must fail");
        assert!(matches!(err, QueueError::Conflict(_)));
        // Only the pre-existing entry remains.
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_retention_remove_on_complete() {
        let mut pool = pool();
        let now = Utc::now();
        let (job, mut opts) = job_with(5, 3);
        let job_id = job.job_id.clone();
        opts.remove_on_complete = Retention::Remove;
        pool.enqueue(job, opts, now);
        pool.claim(None, now).expect("claim");
        pool.ack(&job_id, now).expect("ack");

        assert!(pool.state_of(&job_id).is_none());
    }

    #[test]
    fn test_retention_count_keeps_newest() {
        let mut pool = pool();
        let now = Utc::now();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let (job, mut opts) = job_with(5, 3);
            opts.remove_on_complete = Retention::Count(2);
            ids.push(job.job_id.clone());
            pool.enqueue(job, opts, now);
            let claimed = pool.claim(None, now).expect("claim");
            pool.ack(&claimed.job.job_id, now).expect("ack");
        }

        assert!(pool.state_of(&ids[0]).is_none());
        assert_eq!(pool.state_of(&ids[1]), Some(JobState::Completed));
        assert_eq!(pool.state_of(&ids[2]), Some(JobState::Completed));
    }

    #[test]
    fn test_terminal_id_can_be_reenqueued() {
        let mut pool = pool();
        let now = Utc::now();
        let (job, opts) = job_with(5, 3);
        let job_id = job.job_id.clone();
        pool.enqueue(job.clone(), opts.clone(), now);
        pool.claim(None, now).expect("claim");
        pool.ack(&job_id, now).expect("ack");

        assert_eq!(
            pool.enqueue(job, opts, now),
            EnqueueOutcome::Created(job_id.clone())
        );
        assert_eq!(pool.state_of(&job_id), Some(JobState::Waiting));
    }
}
