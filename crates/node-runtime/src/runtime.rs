//! # Platform Runtime
//!
//! The composition root: constructs every component over the reference
//! backends, starts them in dependency order (stores and bus before the
//! queue, the queue before workers and the scheduler), and drives graceful
//! shutdown.
//!
//! Components are constructed "not ready" and refuse work until their
//! `start()` ran; startup readiness is gated on backend pings with bounded
//! retries, and a backend that never answers is a startup failure.

use crate::config::PlatformConfig;
use photon_telemetry::{HealthTree, TelemetryConfig};
use pf_01_blob_store::InMemoryBlobStore;
use pf_02_metadata_store::InMemoryMetadataStore;
use pf_03_job_queue::{JobQueue, QueueConfig, RecurringScheduler};
use pf_04_ingress::{IngressConfig, PhotoIngress};
use pf_05_pipeline::{ExecutorConfig, PipelineExecutor, PipelineRegistry, FULL_PIPELINE};
use pf_06_worker::{Worker, WorkerConfig, WorkerPool};
use pf_07_event_fabric::RoomRouter;
use shared_bus::InMemoryEventBus;
use shared_types::{Component, ComponentError, ComponentErrorKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How often a failed component start is retried before giving up.
const START_ATTEMPTS: u32 = 5;

/// Delay between start attempts.
const START_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Result of a shutdown attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every component drained within the budget.
    Clean,
    /// The drain budget expired and remaining work was cancelled.
    Forced,
}

/// The wired platform.
pub struct PlatformRuntime {
    config: PlatformConfig,
    blob: Arc<InMemoryBlobStore>,
    meta: Arc<InMemoryMetadataStore>,
    bus: Arc<InMemoryEventBus>,
    queue: JobQueue,
    ingress: Arc<PhotoIngress>,
    workers: Arc<WorkerPool>,
    router: RoomRouter,
    scheduler: RecurringScheduler,
    health: HealthTree,
}

impl PlatformRuntime {
    /// Wire every component from the configuration. Nothing starts yet.
    #[must_use]
    pub fn build(config: PlatformConfig) -> Self {
        let blob = Arc::new(InMemoryBlobStore::new(config.blob_base_url()));
        let meta = Arc::new(InMemoryMetadataStore::new());
        let bus = Arc::new(InMemoryEventBus::new());

        let queue = JobQueue::new(QueueConfig {
            default_lease_ms: config.lease_ms,
            ..QueueConfig::default()
        });

        let registry = Arc::new(PipelineRegistry::with_defaults());
        let ingress = Arc::new(PhotoIngress::new(
            blob.clone(),
            meta.clone(),
            queue.clone(),
            bus.clone(),
            IngressConfig {
                pipeline_name: FULL_PIPELINE.to_string(),
                stages: registry
                    .stage_names(FULL_PIPELINE)
                    .expect("default pipeline registered"),
                ..IngressConfig::default()
            },
        ));

        let executor = Arc::new(PipelineExecutor::new(
            blob.clone(),
            meta.clone(),
            bus.clone(),
            registry,
            ExecutorConfig {
                stage_timeout: Duration::from_millis(config.stage_timeout_ms),
                source: config.service_name.clone(),
                ..ExecutorConfig::default()
            },
        ));

        let worker = Worker::new(
            format!("{}-worker-1", config.service_name),
            queue.clone(),
            executor,
            WorkerConfig {
                concurrency: config.worker_concurrency,
                lease: Duration::from_millis(config.lease_ms),
                ..WorkerConfig::default()
            },
        );
        let workers = Arc::new(WorkerPool::new(vec![worker]));

        let router = RoomRouter::new(bus.clone());
        let scheduler = RecurringScheduler::new(queue.clone());

        let mut health = HealthTree::new(config.service_name.clone());
        health.register(Arc::new(queue.clone()));
        health.register(ingress.clone());
        health.register(workers.clone());
        health.register(Arc::new(router.clone()));
        health.register(Arc::new(scheduler.clone()));

        Self {
            config,
            blob,
            meta,
            bus,
            queue,
            ingress,
            workers,
            router,
            scheduler,
            health,
        }
    }

    /// Telemetry settings matching this runtime.
    #[must_use]
    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self.config.service_name.clone(),
            log_level: self.config.log_level.clone(),
            ..TelemetryConfig::default()
        }
    }

    /// The ingress handle (the platform's write path).
    #[must_use]
    pub fn ingress(&self) -> Arc<PhotoIngress> {
        self.ingress.clone()
    }

    /// The queue handle.
    #[must_use]
    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    /// The event bus.
    #[must_use]
    pub fn bus(&self) -> Arc<InMemoryEventBus> {
        self.bus.clone()
    }

    /// The room router (where client connections register).
    #[must_use]
    pub fn router(&self) -> RoomRouter {
        self.router.clone()
    }

    /// The recurring scheduler.
    #[must_use]
    pub fn scheduler(&self) -> RecurringScheduler {
        self.scheduler.clone()
    }

    /// The reference blob store (fault injection in tests).
    #[must_use]
    pub fn blob_store(&self) -> Arc<InMemoryBlobStore> {
        self.blob.clone()
    }

    /// The reference metadata store.
    #[must_use]
    pub fn metadata_store(&self) -> Arc<InMemoryMetadataStore> {
        self.meta.clone()
    }

    /// Aggregated health report.
    pub async fn health(&self) -> photon_telemetry::health::HealthReport {
        self.health.report().await
    }

    /// Start everything in dependency order.
    ///
    /// # Errors
    ///
    /// The first component that stays down through its retry budget.
    pub async fn start_all(&self) -> Result<(), ComponentError> {
        info!("starting platform components");
        start_with_retries(&self.queue).await?;
        start_with_retries(self.ingress.as_ref()).await?;
        start_with_retries(&self.router).await?;
        start_with_retries(self.workers.as_ref()).await?;
        start_with_retries(&self.scheduler).await?;
        info!("platform running");
        Ok(())
    }

    /// Drain and stop everything. Workers get `drain_timeout`; if they are
    /// still busy afterwards the shutdown is forced.
    pub async fn shutdown(&self, drain_timeout: Duration) -> ShutdownOutcome {
        info!("shutting down: draining workers");
        // Scheduler first so no fresh jobs arrive mid-drain.
        let _ = self.scheduler.stop().await;
        self.queue.pause().await;

        let drained = tokio::time::timeout(drain_timeout, self.workers.stop()).await;
        let outcome = if drained.is_ok() {
            ShutdownOutcome::Clean
        } else {
            warn!("drain budget expired, forcing shutdown");
            ShutdownOutcome::Forced
        };

        let _ = self.router.stop().await;
        if let Err(stop_err) = self.queue.stop().await {
            error!(%stop_err, "queue stop failed");
        }
        let _ = self.ingress.stop().await;
        info!(?outcome, "shutdown complete");
        outcome
    }
}

async fn start_with_retries<C: Component + ?Sized>(component: &C) -> Result<(), ComponentError> {
    let mut last_err = None;
    for attempt in 1..=START_ATTEMPTS {
        match component.start().await {
            Ok(()) => return Ok(()),
            Err(start_err) => {
                warn!(
                    component = component.name(),
                    attempt,
                    %start_err,
                    "component start failed"
                );
                last_err = Some(start_err);
                if attempt < START_ATTEMPTS {
                    tokio::time::sleep(START_RETRY_DELAY).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        ComponentError::new(
            component.name(),
            ComponentErrorKind::StartupFailed,
            "start failed with no error detail",
        )
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::ComponentStatus;

    #[tokio::test]
    async fn test_boot_health_and_clean_shutdown() {
        let runtime = PlatformRuntime::build(PlatformConfig::default());
        runtime.start_all().await.expect("start");

        let report = runtime.health().await;
        eprintln!("DEBUG {:#?}", report.components);
        assert_eq!(report.status, ComponentStatus::Healthy);
        assert_eq!(report.components.len(), 5);

        let outcome = runtime.shutdown(Duration::from_secs(5)).await;
        assert_eq!(outcome, ShutdownOutcome::Clean);

        let report = runtime.health().await;
        assert!(report
            .components
            .iter()
            .all(|c| c.status == ComponentStatus::Stopped));
    }

    #[tokio::test]
    async fn test_operations_rejected_before_start() {
        let runtime = PlatformRuntime::build(PlatformConfig::default());
        let err = runtime
            .ingress()
            .upload(
                bytes::Bytes::from_static(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0]),
                pf_04_ingress::UploadOptions {
                    original_name: "x.png".to_string(),
                    content_type: None,
                    client_id: shared_types::ClientId::from("c1"),
                    session_id: None,
                    user_id: None,
                    extra_metadata: Default::default(),
                },
            )
            .await
            .expect_err("not ready");
        assert!(err.is_retryable());
    }
}
