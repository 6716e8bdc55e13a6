//! # Worker
//!
//! One worker instance: a set of consumer tasks over one queue, all driving
//! the same pipeline executor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pf_03_job_queue::{JobQueue, QueueError};
use pf_05_pipeline::{ExecOutcome, PipelineExecutor};
use serde::Serialize;
use shared_types::{
    Component, ComponentError, ComponentHealth, ComponentStatus, JobId, PhotoId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Constructed, consumers not yet spawned.
    Starting,
    /// Claiming and processing.
    Running,
    /// Consumers alive but not claiming.
    Paused,
    /// No new claims; waiting out active jobs.
    Draining,
    /// All consumers gone.
    Stopped,
}

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Consumer tasks per worker instance.
    pub concurrency: usize,
    /// Lease requested per claim.
    pub lease: Duration,
    /// Drain budget before active jobs are aborted and nacked retryable.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            lease: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(20),
        }
    }
}

/// Health snapshot of one worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    /// Worker name.
    pub name: String,
    /// Lifecycle state.
    pub state: WorkerState,
    /// Jobs currently being processed.
    pub active_jobs: usize,
    /// Jobs settled successfully (completed or cancelled-acked).
    pub processed_total: u64,
    /// Jobs settled with a nack.
    pub failed_total: u64,
    /// Last time any consumer went around its loop.
    pub last_heartbeat: DateTime<Utc>,
}

struct ConsumerHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
    /// Job the consumer is processing right now, if any. Read by drain to
    /// nack jobs whose consumer had to be aborted.
    current_job: Arc<StdMutex<Option<JobId>>>,
}

struct WorkerInner {
    name: String,
    queue: JobQueue,
    executor: Arc<PipelineExecutor>,
    config: WorkerConfig,
    state_tx: watch::Sender<WorkerState>,
    active_jobs: AtomicUsize,
    processed_total: AtomicU64,
    failed_total: AtomicU64,
    last_heartbeat: StdMutex<DateTime<Utc>>,
    consumers: StdMutex<Vec<ConsumerHandle>>,
    /// Cancellation senders for in-flight photos, keyed by photo id.
    active_cancels: StdMutex<HashMap<PhotoId, watch::Sender<bool>>>,
}

/// A worker instance. Cloning shares the same state.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

impl Worker {
    /// Create a worker. Consumers spawn on `start()`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        queue: JobQueue,
        executor: Arc<PipelineExecutor>,
        config: WorkerConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(WorkerState::Starting);
        Self {
            inner: Arc::new(WorkerInner {
                name: name.into(),
                queue,
                executor,
                config,
                state_tx,
                active_jobs: AtomicUsize::new(0),
                processed_total: AtomicU64::new(0),
                failed_total: AtomicU64::new(0),
                last_heartbeat: StdMutex::new(Utc::now()),
                consumers: StdMutex::new(Vec::new()),
                active_cancels: StdMutex::new(HashMap::new()),
            }),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.inner.state_tx.borrow()
    }

    /// Health counters.
    #[must_use]
    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            name: self.inner.name.clone(),
            state: self.state(),
            active_jobs: self.inner.active_jobs.load(Ordering::Relaxed),
            processed_total: self.inner.processed_total.load(Ordering::Relaxed),
            failed_total: self.inner.failed_total.load(Ordering::Relaxed),
            last_heartbeat: *self
                .inner
                .last_heartbeat
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Current consumer count.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.inner
            .consumers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Stop claiming without dropping consumers.
    pub fn pause(&self) {
        let _ = self.inner.state_tx.send(WorkerState::Paused);
        info!(worker = %self.inner.name, "worker paused");
    }

    /// Resume claiming.
    pub fn resume(&self) {
        let _ = self.inner.state_tx.send(WorkerState::Running);
        info!(worker = %self.inner.name, "worker resumed");
    }

    /// Request cancellation of an in-flight photo. Returns whether this
    /// worker was processing it.
    pub fn cancel_photo(&self, photo_id: PhotoId) -> bool {
        let cancels = self
            .inner
            .active_cancels
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match cancels.get(&photo_id) {
            Some(sender) => {
                let _ = sender.send(true);
                info!(worker = %self.inner.name, %photo_id, "photo cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Create or drain consumer tasks to reach `target`. Terminated
    /// consumers finish their current job first.
    pub async fn scale_to(&self, target: usize) {
        let mut to_drain = Vec::new();
        {
            let mut consumers = self
                .inner
                .consumers
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            while consumers.len() > target {
                if let Some(consumer) = consumers.pop() {
                    to_drain.push(consumer);
                }
            }
            let missing = target.saturating_sub(consumers.len());
            for _ in 0..missing {
                consumers.push(self.spawn_consumer());
            }
        }
        for consumer in to_drain {
            let _ = consumer.stop.send(true);
            let _ = consumer.handle.await;
        }
        info!(worker = %self.inner.name, target, "worker scaled");
    }

    /// Drain: stop claims, wait out active jobs up to the shutdown budget,
    /// then abort stragglers and nack their jobs as retryable.
    pub async fn drain(&self) {
        let _ = self.inner.state_tx.send(WorkerState::Draining);
        info!(worker = %self.inner.name, "worker draining");

        let consumers: Vec<ConsumerHandle> = {
            let mut guard = self
                .inner
                .consumers
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for consumer in &consumers {
            let _ = consumer.stop.send(true);
        }

        let deadline = tokio::time::Instant::now() + self.inner.config.shutdown_timeout;
        for mut consumer in consumers {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let finished = tokio::time::timeout(remaining, &mut consumer.handle).await;
            if finished.is_err() {
                // Budget exhausted: abort and hand the job back to the queue.
                consumer.handle.abort();
                let orphaned = consumer
                    .current_job
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                if let Some(job_id) = orphaned {
                    warn!(worker = %self.inner.name, %job_id, "drain timeout, nacking job");
                    if let Err(nack_err) = self
                        .inner
                        .queue
                        .nack(&job_id, "worker drain timeout", false)
                        .await
                    {
                        warn!(worker = %self.inner.name, %job_id, %nack_err, "drain nack failed");
                    }
                }
            }
        }

        let _ = self.inner.state_tx.send(WorkerState::Stopped);
        info!(worker = %self.inner.name, "worker stopped");
    }

    fn spawn_consumer(&self) -> ConsumerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let current_job = Arc::new(StdMutex::new(None));
        let inner = self.inner.clone();
        let slot = current_job.clone();
        let handle = tokio::spawn(async move {
            consumer_loop(inner, stop_rx, slot).await;
        });
        ConsumerHandle {
            stop: stop_tx,
            handle,
            current_job,
        }
    }

}

async fn consumer_loop(
    inner: Arc<WorkerInner>,
    mut stop: watch::Receiver<bool>,
    current_job: Arc<StdMutex<Option<JobId>>>,
) {
    loop {
        if *stop.borrow() {
            break;
        }
        let state = *inner.state_tx.borrow();
        match state {
            WorkerState::Running => {}
            WorkerState::Paused | WorkerState::Starting => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
            WorkerState::Draining | WorkerState::Stopped => break,
        }
        *inner
            .last_heartbeat
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Utc::now();

        // A blocked claim wakes up for stop signals as well as jobs.
        let claimed = tokio::select! {
            claimed = inner.queue.claim(Some(inner.config.lease)) => claimed,
            _ = stop.changed() => continue,
        };
        let claimed = match claimed {
            Ok(claimed) => claimed,
            Err(QueueError::Closed) => break,
            Err(err) => {
                debug!(worker = %inner.name, %err, "claim failed, backing off");
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }
        };

        let job = claimed.job;
        let job_id = job.job_id.clone();
        *current_job.lock().unwrap_or_else(|e| e.into_inner()) = Some(job_id.clone());
        inner.active_jobs.fetch_add(1, Ordering::SeqCst);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        inner
            .active_cancels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.photo_id, cancel_tx);

        let outcome = inner.executor.process(&job, cancel_rx).await;

        inner
            .active_cancels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job.photo_id);
        inner.active_jobs.fetch_sub(1, Ordering::SeqCst);
        *current_job.lock().unwrap_or_else(|e| e.into_inner()) = None;

        let settle = match outcome {
            ExecOutcome::Completed | ExecOutcome::Cancelled => {
                inner.processed_total.fetch_add(1, Ordering::Relaxed);
                inner.queue.ack(&job_id).await.map(|_| ())
            }
            ExecOutcome::Retry(reason) => {
                inner.failed_total.fetch_add(1, Ordering::Relaxed);
                inner.queue.nack(&job_id, reason, false).await.map(|_| ())
            }
            ExecOutcome::Fatal(reason) => {
                inner.failed_total.fetch_add(1, Ordering::Relaxed);
                inner.queue.nack(&job_id, reason, true).await.map(|_| ())
            }
        };
        if let Err(settle_err) = settle {
            // The janitor will reclaim the lease if the settle was lost.
            warn!(worker = %inner.name, %job_id, %settle_err, "job settle failed");
        }
    }
    debug!(worker = %inner.name, "consumer exited");
}

#[async_trait]
impl Component for Worker {
    fn name(&self) -> &'static str {
        "worker"
    }

    async fn start(&self) -> Result<(), ComponentError> {
        let _ = self.inner.state_tx.send(WorkerState::Running);
        {
            let mut consumers = self
                .inner
                .consumers
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for _ in 0..self.inner.config.concurrency.max(1) {
                consumers.push(self.spawn_consumer());
            }
        }
        info!(
            worker = %self.inner.name,
            concurrency = self.inner.config.concurrency,
            "worker started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), ComponentError> {
        self.drain().await;
        Ok(())
    }

    async fn health(&self) -> ComponentHealth {
        let snapshot = self.snapshot();
        let status = match snapshot.state {
            WorkerState::Running => ComponentStatus::Healthy,
            WorkerState::Starting => ComponentStatus::Starting,
            WorkerState::Paused | WorkerState::Draining => ComponentStatus::Degraded,
            WorkerState::Stopped => ComponentStatus::Stopped,
        };
        ComponentHealth {
            name: self.inner.name.clone(),
            status,
            details: serde_json::to_value(&snapshot).unwrap_or(serde_json::Value::Null),
        }
    }
}
