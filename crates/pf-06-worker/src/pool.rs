//! # Worker Pool
//!
//! A set of worker instances over one queue, reported as a single
//! component: aggregated counters, collective start/drain.

use crate::worker::{Worker, WorkerSnapshot, WorkerState};
use async_trait::async_trait;
use shared_types::{Component, ComponentError, ComponentHealth, ComponentStatus};
use tracing::info;

/// Aggregates workers for lifecycle and health.
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Build a pool over existing workers.
    #[must_use]
    pub fn new(workers: Vec<Worker>) -> Self {
        Self { workers }
    }

    /// The pooled workers.
    #[must_use]
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Per-worker snapshots.
    #[must_use]
    pub fn snapshots(&self) -> Vec<WorkerSnapshot> {
        self.workers.iter().map(Worker::snapshot).collect()
    }

    /// Sum of jobs being processed right now.
    #[must_use]
    pub fn active_jobs(&self) -> usize {
        self.snapshots().iter().map(|s| s.active_jobs).sum()
    }

    /// Pause every worker.
    pub fn pause_all(&self) {
        for worker in &self.workers {
            worker.pause();
        }
    }

    /// Resume every worker.
    pub fn resume_all(&self) {
        for worker in &self.workers {
            worker.resume();
        }
    }
}

#[async_trait]
impl Component for WorkerPool {
    fn name(&self) -> &'static str {
        "worker-pool"
    }

    async fn start(&self) -> Result<(), ComponentError> {
        for worker in &self.workers {
            worker.start().await?;
        }
        info!(workers = self.workers.len(), "worker pool started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ComponentError> {
        for worker in &self.workers {
            worker.drain().await;
        }
        info!("worker pool stopped");
        Ok(())
    }

    async fn health(&self) -> ComponentHealth {
        let snapshots = self.snapshots();
        let status = snapshots
            .iter()
            .map(|s| match s.state {
                WorkerState::Running => ComponentStatus::Healthy,
                WorkerState::Starting => ComponentStatus::Starting,
                WorkerState::Paused | WorkerState::Draining => ComponentStatus::Degraded,
                WorkerState::Stopped => ComponentStatus::Stopped,
            })
            .max_by_key(ComponentStatus::severity)
            .unwrap_or(ComponentStatus::Stopped);

        let processed: u64 = snapshots.iter().map(|s| s.processed_total).sum();
        let failed: u64 = snapshots.iter().map(|s| s.failed_total).sum();
        ComponentHealth {
            name: self.name().to_string(),
            status,
            details: serde_json::json!({
                "workers": snapshots.len(),
                "active_jobs": self.active_jobs(),
                "processed_total": processed,
                "failed_total": failed,
            }),
        }
    }
}
