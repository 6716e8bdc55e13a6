//! # Job Queue Facade
//!
//! Async wrapper around [`JobPool`]: claim waiting, lease janitoring, the
//! dead-letter stream, optional claim rate limiting, and the component
//! lifecycle. Cloning the handle is cheap; all clones share one pool.

use crate::dlq::DeadLetterQueue;
use crate::pool::{
    ClaimedJob, EnqueueOutcome, JobPool, JobState, NackOutcome, QueueConfig, QueueError,
    QueueStats,
};
use async_trait::async_trait;
use chrono::Utc;
use shared_types::{
    Component, ComponentError, ComponentErrorKind, ComponentHealth, ComponentStatus, Job, JobId,
    JobOptions, RateLimiter,
};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Longest a blocked claim sleeps before re-checking the pool. The janitor
/// and enqueue notifications normally wake it much earlier.
const CLAIM_POLL_CAP: Duration = Duration::from_millis(500);

/// How long a blocked claim waits for a limiter token before re-trying.
const LIMITER_RETRY_DELAY: Duration = Duration::from_millis(25);

const PHASE_NOT_READY: u8 = 0;
const PHASE_RUNNING: u8 = 1;
const PHASE_STOPPED: u8 = 2;

struct QueueInner {
    pool: Mutex<JobPool>,
    /// Wakes blocked claims on enqueue, requeue, and shutdown.
    notify: Notify,
    dlq: DeadLetterQueue,
    limiter: Option<RateLimiter>,
    connected: AtomicBool,
    phase: AtomicU8,
    janitor_interval: Duration,
    janitor: StdMutex<Option<JoinHandle<()>>>,
}

/// Cheaply cloneable handle to the shared queue.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    /// Create a queue. The janitor scan interval is a third of the default
    /// lease, floored at 100ms, keeping stall detection within one lease.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self::with_limiter(config, None)
    }

    /// Create a queue with a consumer-side claim limiter.
    #[must_use]
    pub fn with_limiter(config: QueueConfig, limiter: Option<RateLimiter>) -> Self {
        let janitor_interval =
            Duration::from_millis((config.default_lease_ms / 3).max(100));
        Self {
            inner: Arc::new(QueueInner {
                pool: Mutex::new(JobPool::new(config)),
                notify: Notify::new(),
                dlq: DeadLetterQueue::new(),
                limiter,
                connected: AtomicBool::new(true),
                phase: AtomicU8::new(PHASE_NOT_READY),
                janitor_interval,
                janitor: StdMutex::new(None),
            }),
        }
    }

    /// The dead-letter stream.
    #[must_use]
    pub fn dlq(&self) -> &DeadLetterQueue {
        &self.inner.dlq
    }

    /// Flip the simulated backend transport.
    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::SeqCst);
        if connected {
            self.inner.notify.notify_waiters();
        }
    }

    /// Insert a job. Duplicate non-terminal ids are a no-op.
    ///
    /// # Errors
    ///
    /// `Closed` before start / after stop, `BackendUnavailable` while the
    /// transport is down.
    pub async fn enqueue(
        &self,
        job: Job,
        options: JobOptions,
    ) -> Result<EnqueueOutcome, QueueError> {
        self.ensure_operational()?;
        let outcome = self.inner.pool.lock().await.enqueue(job, options, Utc::now());
        if let EnqueueOutcome::Created(job_id) = &outcome {
            debug!(job_id = %job_id, "job enqueued");
            self.inner.notify.notify_waiters();
        }
        Ok(outcome)
    }

    /// Atomic all-or-nothing insert of a batch.
    ///
    /// # Errors
    ///
    /// `Conflict` if any id collides; nothing is enqueued in that case.
    pub async fn enqueue_bulk(
        &self,
        batch: Vec<(Job, JobOptions)>,
    ) -> Result<Vec<JobId>, QueueError> {
        self.ensure_operational()?;
        let ids = self
            .inner
            .pool
            .lock()
            .await
            .enqueue_bulk(batch, Utc::now())?;
        self.inner.notify.notify_waiters();
        Ok(ids)
    }

    /// Claim the next due job, waiting until one is available.
    ///
    /// Cancellation-safe: dropping the future claims nothing. A saturated
    /// rate limiter makes the call wait, not fail.
    ///
    /// # Errors
    ///
    /// `Closed` when the queue stops while waiting, `BackendUnavailable`
    /// while the transport is down.
    pub async fn claim(&self, lease: Option<Duration>) -> Result<ClaimedJob, QueueError> {
        loop {
            // Arm the notification before checking so an enqueue between the
            // check and the await cannot be missed.
            let notified = self.inner.notify.notified();

            match self.try_claim(lease).await {
                Ok(Some(claimed)) => return Ok(claimed),
                Ok(None) => {}
                Err(QueueError::LimiterBusy) => {
                    tokio::time::sleep(LIMITER_RETRY_DELAY).await;
                    continue;
                }
                Err(other) => return Err(other),
            }

            let wait = {
                let pool = self.inner.pool.lock().await;
                pool.next_available_at()
                    .and_then(|at| (at - Utc::now()).to_std().ok())
                    .map_or(CLAIM_POLL_CAP, |d| d.min(CLAIM_POLL_CAP))
            };
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Claim without blocking.
    ///
    /// # Errors
    ///
    /// `LimiterBusy` when a job is due but the limiter refuses a token,
    /// plus the failures of [`JobQueue::claim`].
    pub async fn try_claim(
        &self,
        lease: Option<Duration>,
    ) -> Result<Option<ClaimedJob>, QueueError> {
        self.ensure_operational()?;
        let mut pool = self.inner.pool.lock().await;
        let now = Utc::now();
        pool.promote_due(now);

        // Consult the limiter only when work is actually claimable, so an
        // idle consumer does not burn tokens.
        let stats = pool.stats();
        if stats.paused || stats.waiting == 0 {
            return Ok(None);
        }
        if let Some(limiter) = &self.inner.limiter {
            if !limiter.try_acquire() {
                return Err(QueueError::LimiterBusy);
            }
        }
        Ok(pool.claim(lease.map(|d| d.as_millis() as u64), now))
    }

    /// Ack an active job as completed.
    pub async fn ack(&self, job_id: &JobId) -> Result<(), QueueError> {
        self.ensure_operational()?;
        self.inner.pool.lock().await.ack(job_id, Utc::now())?;
        debug!(job_id = %job_id, "job completed");
        Ok(())
    }

    /// Nack an active job; retryable failures re-queue with backoff, fatal
    /// or exhausted ones dead-letter.
    pub async fn nack(
        &self,
        job_id: &JobId,
        error: impl Into<String> + Send,
        fatal: bool,
    ) -> Result<NackOutcome, QueueError> {
        self.ensure_operational()?;
        let (outcome, dead_letter) =
            self.inner
                .pool
                .lock()
                .await
                .nack(job_id, error, fatal, Utc::now())?;
        if let Some(entry) = dead_letter {
            self.inner.dlq.append(entry);
        }
        self.inner.notify.notify_waiters();
        Ok(outcome)
    }

    /// Extend the lease of an active job, bounded by the total-lease cap.
    pub async fn extend_lease(
        &self,
        job_id: &JobId,
        additional: Duration,
    ) -> Result<chrono::DateTime<Utc>, QueueError> {
        self.ensure_operational()?;
        self.inner.pool.lock().await.extend_lease(
            job_id,
            additional.as_millis() as u64,
            Utc::now(),
        )
    }

    /// Stop issuing claims; enqueues continue to be accepted.
    pub async fn pause(&self) {
        self.inner.pool.lock().await.pause();
    }

    /// Resume issuing claims.
    pub async fn resume(&self) {
        self.inner.pool.lock().await.resume();
        self.inner.notify.notify_waiters();
    }

    /// State of a tracked job.
    pub async fn state_of(&self, job_id: &JobId) -> Option<JobState> {
        self.inner.pool.lock().await.state_of(job_id)
    }

    /// Snapshot of a tracked job.
    pub async fn job(&self, job_id: &JobId) -> Option<Job> {
        self.inner.pool.lock().await.job(job_id)
    }

    /// Counter snapshot.
    pub async fn stats(&self) -> QueueStats {
        self.inner.pool.lock().await.stats()
    }

    fn ensure_operational(&self) -> Result<(), QueueError> {
        if self.inner.phase.load(Ordering::SeqCst) != PHASE_RUNNING {
            return Err(QueueError::Closed);
        }
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(QueueError::BackendUnavailable(
                "transport disconnected".into(),
            ));
        }
        Ok(())
    }

    fn spawn_janitor(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let interval = self.inner.janitor_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if inner.phase.load(Ordering::SeqCst) != PHASE_RUNNING {
                    break;
                }
                let now = Utc::now();
                let (promoted, reaped) = {
                    let mut pool = inner.pool.lock().await;
                    (pool.promote_due(now), pool.reap_stalled(now))
                };
                for entry in &reaped.dead_lettered {
                    inner.dlq.append(entry.clone());
                }
                if !reaped.requeued.is_empty() {
                    warn!(
                        count = reaped.requeued.len(),
                        "stalled jobs returned to waiting"
                    );
                }
                if promoted > 0 || !reaped.requeued.is_empty() {
                    inner.notify.notify_waiters();
                }
            }
        })
    }
}

#[async_trait]
impl Component for JobQueue {
    fn name(&self) -> &'static str {
        "job-queue"
    }

    async fn start(&self) -> Result<(), ComponentError> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(ComponentError::new(
                self.name(),
                ComponentErrorKind::BackendUnreachable,
                "queue backend did not answer ping",
            ));
        }
        self.inner.phase.store(PHASE_RUNNING, Ordering::SeqCst);
        let handle = self.spawn_janitor();
        *self
            .inner
            .janitor
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!(
            janitor_interval_ms = self.inner.janitor_interval.as_millis() as u64,
            "job queue started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), ComponentError> {
        self.inner.phase.store(PHASE_STOPPED, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        let handle = self
            .inner
            .janitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        info!("job queue stopped");
        Ok(())
    }

    async fn health(&self) -> ComponentHealth {
        let stats = self.stats().await;
        let status = match self.inner.phase.load(Ordering::SeqCst) {
            PHASE_RUNNING if self.inner.connected.load(Ordering::SeqCst) => {
                ComponentStatus::Healthy
            }
            PHASE_RUNNING => ComponentStatus::Degraded,
            PHASE_NOT_READY => ComponentStatus::Starting,
            _ => ComponentStatus::Stopped,
        };
        ComponentHealth {
            name: self.name().to_string(),
            status,
            details: serde_json::json!({
                "waiting": stats.waiting,
                "delayed": stats.delayed,
                "active": stats.active,
                "dead_lettered_total": stats.dead_lettered_total,
                "claims_total": stats.claims_total,
                "dlq_depth": self.inner.dlq.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{BackoffPolicy, PhotoId, TraceId};

    fn test_job(priority: u8) -> (Job, JobOptions) {
        let options = JobOptions {
            priority,
            max_attempts: 3,
            backoff: BackoffPolicy::Fixed { base_ms: 50 },
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

    async fn started_queue(config: QueueConfig) -> JobQueue {
        let queue = JobQueue::new(config);
        queue.start().await.expect("start");
        queue
    }

    #[tokio::test]
    async fn test_operations_rejected_before_start() {
        let queue = JobQueue::new(QueueConfig::default());
        let (job, options) = test_job(5);
        assert_eq!(
            queue.enqueue(job, options).await.expect_err("closed"),
            QueueError::Closed
        );
    }

    #[tokio::test]
    async fn test_claim_waits_for_enqueue() {
        let queue = started_queue(QueueConfig::default()).await;
        let claimer = queue.clone();
        let handle = tokio::spawn(async move { claimer.claim(None).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let (job, options) = test_job(5);
        let job_id = job.job_id.clone();
        queue.enqueue(job, options).await.expect("enqueue");

        let claimed = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("claim must wake")
            .expect("join")
            .expect("claim");
        assert_eq!(claimed.job.job_id, job_id);
    }

    #[tokio::test]
    async fn test_backoff_retry_becomes_claimable_again() {
        let queue = started_queue(QueueConfig::default()).await;
        let (job, options) = test_job(5);
        let job_id = job.job_id.clone();
        queue.enqueue(job, options).await.expect("enqueue");

        let claimed = queue.claim(None).await.expect("claim");
        let outcome = queue
            .nack(&claimed.job.job_id, "transient blob failure", false)
            .await
            .expect("nack");
        assert!(matches!(outcome, NackOutcome::Retried { .. }));

        // 50ms fixed backoff; the blocking claim absorbs the delay.
        let again = tokio::time::timeout(Duration::from_secs(2), queue.claim(None))
            .await
            .expect("claimable again")
            .expect("claim");
        assert_eq!(again.job.job_id, job_id);
        assert_eq!(again.job.attempts, 2);
    }

    #[tokio::test]
    async fn test_fatal_nack_lands_in_dlq() {
        let queue = started_queue(QueueConfig::default()).await;
        let (job, options) = test_job(5);
        queue.enqueue(job, options).await.expect("enqueue");

        let claimed = queue.claim(None).await.expect("claim");
        let outcome = queue
            .nack(&claimed.job.job_id, "corrupt image", true)
            .await
            .expect("nack");
        assert_eq!(outcome, NackOutcome::DeadLettered);
        assert_eq!(queue.dlq().len(), 1);
        assert_eq!(
            queue.dlq().find(&claimed.job.job_id).expect("entry").last_error,
            "corrupt image"
        );
    }

    #[tokio::test]
    async fn test_janitor_requeues_stalled_claim() {
        let queue = started_queue(QueueConfig {
            default_lease_ms: 150,
            max_total_lease_ms: 60_000,
        })
        .await;
        let (job, options) = test_job(5);
        let job_id = job.job_id.clone();
        queue.enqueue(job, options).await.expect("enqueue");

        // Claim and "crash": never ack.
        let claimed = queue.claim(None).await.expect("claim");
        assert_eq!(claimed.job.attempts, 1);

        let reclaimed = tokio::time::timeout(Duration::from_secs(3), queue.claim(None))
            .await
            .expect("janitor must requeue")
            .expect("claim");
        assert_eq!(reclaimed.job.job_id, job_id);
        assert_eq!(reclaimed.job.attempts, 2);
        assert!(queue.stats().await.stalled_reaped_total >= 1);
    }

    #[tokio::test]
    async fn test_limiter_busy_on_try_claim() {
        let queue = JobQueue::with_limiter(
            QueueConfig::default(),
            Some(RateLimiter::new(1, 0)), // one token, never refilled
        );
        queue.start().await.expect("start");

        let (job_a, opts_a) = test_job(5);
        let (job_b, opts_b) = test_job(5);
        queue.enqueue(job_a, opts_a).await.expect("enqueue");
        queue.enqueue(job_b, opts_b).await.expect("enqueue");

        assert!(queue.try_claim(None).await.expect("first claim").is_some());
        assert_eq!(
            queue.try_claim(None).await.expect_err("limited"),
            QueueError::LimiterBusy
        );
    }

    #[tokio::test]
    async fn test_disconnected_backend_surfaces() {
        let queue = started_queue(QueueConfig::default()).await;
        queue.set_connected(false);
        let (job, options) = test_job(5);
        assert!(matches!(
            queue.enqueue(job, options).await.expect_err("down"),
            QueueError::BackendUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_stop_wakes_blocked_claims() {
        let queue = started_queue(QueueConfig::default()).await;
        let claimer = queue.clone();
        let handle = tokio::spawn(async move { claimer.claim(None).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.stop().await.expect("stop");

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("claim must return")
            .expect("join");
        assert_eq!(result.expect_err("closed"), QueueError::Closed);
    }
}
