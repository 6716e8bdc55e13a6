//! # Recurring Job Scheduler
//!
//! Maintains cron-style specs and enqueues one job per nominal tick.
//!
//! The job id for a tick is a deterministic hash of `(spec name, nominal
//! time)`, so a restarted scheduler re-deriving the same tick enqueues a
//! duplicate id and the queue's producer-side dedup collapses it: exactly
//! one enqueue per nominal tick, even across restarts.
//!
//! Schedules evaluate in UTC; any other timezone is rejected at
//! registration.

use crate::pool::QueueError;
use crate::queue::JobQueue;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use sha2::{Digest, Sha256};
use shared_types::{
    Component, ComponentError, ComponentHealth, ComponentStatus, Job, JobId, JobOptions,
};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How often the scheduler evaluates its specs.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Errors from spec registration.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// The cron expression did not parse.
    #[error("invalid cron expression '{0}'")]
    InvalidCron(String),

    /// Only UTC schedules are supported.
    #[error("unsupported timezone '{0}' (only UTC)")]
    UnsupportedTimezone(String),

    /// A spec with the same name is already registered.
    #[error("recurring spec already registered: {0}")]
    DuplicateName(String),
}

/// A registered recurring job.
pub struct RecurringSpec {
    /// Unique spec name; part of the deterministic job id.
    pub name: String,
    /// Original cron expression, for introspection.
    pub cron_expr: String,
    /// Parsed schedule.
    pub schedule: Schedule,
    /// Timezone tag. Only `UTC` is accepted today.
    pub timezone: String,
    /// Job stamped out on every tick (id and timing fields are overwritten).
    pub template: Job,
    /// Options applied to every stamped job.
    pub options: JobOptions,
}

impl RecurringSpec {
    /// Parse and validate a spec.
    ///
    /// # Errors
    ///
    /// `InvalidCron` / `UnsupportedTimezone` per the field docs.
    pub fn new(
        name: impl Into<String>,
        cron_expr: &str,
        timezone: &str,
        template: Job,
        options: JobOptions,
    ) -> Result<Self, SchedulerError> {
        let schedule = Schedule::from_str(cron_expr)
            .map_err(|_| SchedulerError::InvalidCron(cron_expr.to_string()))?;
        if !timezone.eq_ignore_ascii_case("utc") {
            return Err(SchedulerError::UnsupportedTimezone(timezone.to_string()));
        }
        Ok(Self {
            name: name.into(),
            cron_expr: cron_expr.to_string(),
            schedule,
            timezone: "UTC".to_string(),
            template,
            options,
        })
    }

    /// Nominal fire times strictly after `after`, up to and including `until`.
    #[must_use]
    pub fn due_between(&self, after: DateTime<Utc>, until: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        self.schedule
            .after(&after)
            .take_while(|t| *t <= until)
            .collect()
    }
}

/// Deterministic job id for one nominal tick of one spec.
#[must_use]
pub fn tick_job_id(name: &str, nominal: DateTime<Utc>) -> JobId {
    let digest = Sha256::digest(format!("{name}|{}", nominal.timestamp()));
    JobId(format!("cron:{name}:{}", &hex::encode(digest)[..16]))
}

struct SchedulerInner {
    queue: JobQueue,
    specs: StdMutex<Vec<RecurringSpec>>,
    tick_interval: Duration,
    last_tick: StdMutex<DateTime<Utc>>,
    running: AtomicBool,
    ticks_enqueued: AtomicU64,
    handle: StdMutex<Option<JoinHandle<()>>>,
}

/// Evaluates registered specs on a tick task and enqueues due jobs.
#[derive(Clone)]
pub struct RecurringScheduler {
    inner: Arc<SchedulerInner>,
}

impl RecurringScheduler {
    /// Create a scheduler over a queue.
    #[must_use]
    pub fn new(queue: JobQueue) -> Self {
        Self::with_tick_interval(queue, DEFAULT_TICK_INTERVAL)
    }

    /// Create a scheduler with an explicit tick interval.
    #[must_use]
    pub fn with_tick_interval(queue: JobQueue, tick_interval: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                queue,
                specs: StdMutex::new(Vec::new()),
                tick_interval,
                last_tick: StdMutex::new(Utc::now()),
                running: AtomicBool::new(false),
                ticks_enqueued: AtomicU64::new(0),
                handle: StdMutex::new(None),
            }),
        }
    }

    /// Register a spec.
    ///
    /// # Errors
    ///
    /// `DuplicateName` when a spec of the same name exists.
    pub fn register(&self, spec: RecurringSpec) -> Result<(), SchedulerError> {
        let mut specs = self
            .inner
            .specs
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if specs.iter().any(|s| s.name == spec.name) {
            return Err(SchedulerError::DuplicateName(spec.name));
        }
        info!(name = %spec.name, cron = %spec.cron_expr, "recurring spec registered");
        specs.push(spec);
        Ok(())
    }

    /// Remove a spec by name. Returns whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut specs = self
            .inner
            .specs
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let before = specs.len();
        specs.retain(|s| s.name != name);
        specs.len() != before
    }

    /// Number of registered specs.
    #[must_use]
    pub fn spec_count(&self) -> usize {
        self.inner
            .specs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Enqueue every nominal tick in `(after, until]`. Returns how many jobs
    /// were actually created (deduped ticks excluded). Exposed for tests and
    /// catch-up after restart.
    pub async fn run_due(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<usize, QueueError> {
        // Stamp the batch outside the lock; enqueue can suspend.
        let stamped: Vec<(Job, JobOptions)> = {
            let specs = self
                .inner
                .specs
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            specs
                .iter()
                .flat_map(|spec| {
                    spec.due_between(after, until)
                        .into_iter()
                        .map(|nominal| {
                            let mut job = spec.template.clone();
                            job.job_id = tick_job_id(&spec.name, nominal);
                            job.attempts = 0;
                            job.enqueued_at = nominal;
                            job.available_at = nominal;
                            (job, spec.options.clone())
                        })
                        .collect::<Vec<_>>()
                })
                .collect()
        };

        let mut created = 0;
        for (job, options) in stamped {
            let job_id = job.job_id.clone();
            match self.inner.queue.enqueue(job, options).await? {
                crate::pool::EnqueueOutcome::Created(_) => {
                    created += 1;
                    self.inner.ticks_enqueued.fetch_add(1, Ordering::Relaxed);
                }
                crate::pool::EnqueueOutcome::Duplicate(_) => {
                    debug!(job_id = %job_id, "tick already enqueued, skipped");
                }
            }
        }
        Ok(created)
    }
}

#[async_trait]
impl Component for RecurringScheduler {
    fn name(&self) -> &'static str {
        "recurring-scheduler"
    }

    async fn start(&self) -> Result<(), ComponentError> {
        self.inner.running.store(true, Ordering::SeqCst);
        *self
            .inner
            .last_tick
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Utc::now();

        let inner = self.inner.clone();
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
                let now = Utc::now();
                let after = {
                    let mut last = inner
                        .last_tick
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    std::mem::replace(&mut *last, now)
                };
                if let Err(error) = scheduler.run_due(after, now).await {
                    warn!(%error, "recurring tick enqueue failed");
                }
            }
        });
        *self
            .inner
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!("recurring scheduler started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ComponentError> {
        self.inner.running.store(false, Ordering::SeqCst);
        let handle = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        info!("recurring scheduler stopped");
        Ok(())
    }

    async fn health(&self) -> ComponentHealth {
        let status = if self.inner.running.load(Ordering::SeqCst) {
            ComponentStatus::Healthy
        } else {
            ComponentStatus::Stopped
        };
        ComponentHealth {
            name: self.name().to_string(),
            status,
            details: serde_json::json!({
                "specs": self.spec_count(),
                "ticks_enqueued": self.inner.ticks_enqueued.load(Ordering::Relaxed),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::QueueConfig;
    use chrono::TimeZone;
    use shared_types::{PhotoId, TraceId};

    fn template() -> (Job, JobOptions) {
        let options = JobOptions::default();
        let job = Job::for_photo(
            PhotoId::generate(),
            "photos/sweep",
            "photos",
            "quick_processing",
            vec!["validation".into()],
            &options,
            TraceId::generate(),
            Utc::now(),
        );
        (job, options)
    }

    #[test]
    fn test_tick_job_id_deterministic() {
        let nominal = Utc.with_ymd_and_hms(2026, 8, 1, 12, 30, 0).unwrap();
        assert_eq!(tick_job_id("sweep", nominal), tick_job_id("sweep", nominal));
        assert_ne!(
            tick_job_id("sweep", nominal),
            tick_job_id("sweep", nominal + chrono::Duration::minutes(1))
        );
        assert_ne!(tick_job_id("sweep", nominal), tick_job_id("other", nominal));
    }

    #[test]
    fn test_due_between_counts_minutes() {
        let (job, options) = template();
        // Every minute at second 0.
        let spec = RecurringSpec::new("sweep", "0 * * * * *", "UTC", job, options).expect("spec");

        let start = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 30).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 8, 1, 12, 5, 30).unwrap();
        let due = spec.due_between(start, end);
        assert_eq!(due.len(), 5);
        assert_eq!(due[0], Utc.with_ymd_and_hms(2026, 8, 1, 12, 1, 0).unwrap());
    }

    #[test]
    fn test_invalid_cron_and_timezone_rejected() {
        let (job, options) = template();
        assert!(matches!(
            RecurringSpec::new("x", "not a cron", "UTC", job.clone(), options.clone()),
            Err(SchedulerError::InvalidCron(_))
        ));
        assert!(matches!(
            RecurringSpec::new("x", "0 * * * * *", "Europe/Berlin", job, options),
            Err(SchedulerError::UnsupportedTimezone(_))
        ));
    }

    #[tokio::test]
    async fn test_run_due_enqueues_exactly_once_per_tick() {
        let queue = JobQueue::new(QueueConfig::default());
        queue.start().await.expect("start");
        let scheduler = RecurringScheduler::new(queue.clone());

        let (job, options) = template();
        scheduler
            .register(RecurringSpec::new("sweep", "0 * * * * *", "UTC", job, options).expect("spec"))
            .expect("register");

        let start = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 30).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 8, 1, 12, 3, 30).unwrap();

        let created = scheduler.run_due(start, end).await.expect("run");
        assert_eq!(created, 3);

        // A restarted scheduler re-deriving the same window creates nothing.
        let replay = scheduler.run_due(start, end).await.expect("run again");
        assert_eq!(replay, 0);
        assert_eq!(queue.stats().await.enqueued_total, 3);
    }

    #[test]
    fn test_duplicate_spec_name_rejected() {
        let queue = JobQueue::new(QueueConfig::default());
        let scheduler = RecurringScheduler::new(queue);
        let (job, options) = template();
        scheduler
            .register(
                RecurringSpec::new("sweep", "0 * * * * *", "UTC", job.clone(), options.clone())
                    .expect("spec"),
            )
            .expect("register");
        assert!(matches!(
            scheduler.register(RecurringSpec::new("sweep", "0 * * * * *", "UTC", job, options).expect("spec")),
            Err(SchedulerError::DuplicateName(_))
        ));
    }
}
