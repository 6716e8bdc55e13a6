//! # Pipeline Executor
//!
//! Drives one claimed job through its pipeline:
//!
//! 1. fetch the original blob (bounded internal retries)
//! 2. `queued -> in_progress`, emit `photo.processing.started`
//! 3. per stage: progress, timeout-guarded invocation, artifact writeback
//!    (idempotent by blob key), `photo.processing.stage.completed`
//! 4. terminal transition + event
//!
//! The record is persisted before each event is published, so the per-photo
//! sequence survives crashes: a second worker resuming the photo continues
//! the numbering instead of restarting it. Stages already `done` from an
//! earlier attempt are skipped, which keeps retried jobs from re-writing
//! artifacts or double-emitting their stage events.

use crate::registry::PipelineRegistry;
use crate::stage::{StageContext, StageError, StageOutput};
use crate::{artifact_key, Pipeline};
use bytes::Bytes;
use chrono::Utc;
use pf_01_blob_store::{BlobError, BlobStore, PutOptions};
use pf_02_metadata_store::{MetadataError, MetadataStore};
use shared_bus::EventPublisher;
use shared_types::{
    Artifact, EventKind, EventMetadata, Job, PhotoEvent, PhotoRecord, PhotoStatus, TraceId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How the worker should settle the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Ack: the photo completed (or had already completed).
    Completed,
    /// Nack retryable: transient trouble, back off and re-claim.
    Retry(String),
    /// Nack fatal: the photo failed terminally; dead-letter the job.
    Fatal(String),
    /// Ack without retry: cancellation reached the photo.
    Cancelled,
}

/// Executor tuning.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Per-stage wall-clock budget.
    pub stage_timeout: Duration,
    /// Blob fetch attempts before surfacing a retryable failure.
    pub fetch_attempts: u32,
    /// Delay between blob fetch attempts.
    pub fetch_retry_delay: Duration,
    /// How long a cancelled stage may keep running before it is abandoned.
    pub cancel_grace: Duration,
    /// `metadata.source` stamped on emitted events.
    pub source: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(30),
            fetch_attempts: 3,
            fetch_retry_delay: Duration::from_millis(100),
            cancel_grace: Duration::from_secs(2),
            source: "worker".to_string(),
        }
    }
}

/// Stage-based executor bound to the stores and the bus.
pub struct PipelineExecutor {
    blob: Arc<dyn BlobStore>,
    meta: Arc<dyn MetadataStore>,
    bus: Arc<dyn EventPublisher>,
    registry: Arc<PipelineRegistry>,
    config: ExecutorConfig,
}

impl PipelineExecutor {
    /// Wire an executor.
    #[must_use]
    pub fn new(
        blob: Arc<dyn BlobStore>,
        meta: Arc<dyn MetadataStore>,
        bus: Arc<dyn EventPublisher>,
        registry: Arc<PipelineRegistry>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            blob,
            meta,
            bus,
            registry,
            config,
        }
    }

    /// Process one claimed job to an outcome the worker can settle.
    pub async fn process(&self, job: &Job, cancelled: watch::Receiver<bool>) -> ExecOutcome {
        match self.run(job, cancelled).await {
            Ok(outcome) | Err(outcome) => outcome,
        }
    }

    async fn run(
        &self,
        job: &Job,
        cancelled: watch::Receiver<bool>,
    ) -> Result<ExecOutcome, ExecOutcome> {
        let Some(pipeline) = self.registry.get(&job.pipeline_name) else {
            return Ok(ExecOutcome::Fatal(format!(
                "unknown pipeline '{}'",
                job.pipeline_name
            )));
        };

        let mut record = self.load_record(job).await?;
        match record.status {
            PhotoStatus::Completed => {
                // Redelivered job for a finished photo: settle quietly, no
                // duplicate completion event.
                debug!(photo_id = %record.id, "photo already completed, acking redelivery");
                return Ok(ExecOutcome::Completed);
            }
            PhotoStatus::Failed => {
                return Ok(ExecOutcome::Fatal("photo already failed".into()));
            }
            PhotoStatus::Cancelled => {
                return Ok(ExecOutcome::Cancelled);
            }
            PhotoStatus::Queued | PhotoStatus::InProgress => {}
        }

        let bytes = self.fetch_blob(job).await?;

        let now = Utc::now();
        if record.status == PhotoStatus::Queued {
            let stage_names: Vec<String> = pipeline.stage_names();
            record
                .begin_processing(&stage_names, now)
                .map_err(|err| ExecOutcome::Retry(err.to_string()))?;
            self.persist_and_emit(
                &mut record,
                job.trace_id,
                EventKind::ProcessingStarted,
                serde_json::json!({
                    "pipeline": pipeline.name,
                    "stages": stage_names,
                }),
            )
            .await?;
            info!(photo_id = %record.id, pipeline = %pipeline.name, "processing started");
        }

        let total = pipeline.stages.len();
        for (index, stage) in pipeline.stages.iter().enumerate() {
            let stage_name = stage.name();
            if record
                .stage_progress
                .get(stage_name)
                .map_or(false, |p| p.state == shared_types::StageState::Done)
            {
                debug!(photo_id = %record.id, stage = stage_name, "stage already done, skipping");
                continue;
            }

            if *cancelled.borrow() {
                return self.settle_cancelled(&mut record, job.trace_id).await;
            }

            record.stage_running(stage_name, Utc::now());
            self.persist(&record).await?;

            let ctx = StageContext {
                photo: record.clone(),
                bytes: bytes.clone(),
                trace_id: job.trace_id,
                cancelled: cancelled.clone(),
            };
            let result = self
                .run_stage_guarded(&pipeline, index, &ctx, cancelled.clone())
                .await;

            match result {
                Ok(output) => {
                    self.write_artifacts(&mut record, &output).await?;
                    record.stage_done(stage_name, Utc::now());
                    let progress = (((index + 1) * 100) / total) as u8;
                    self.persist_and_emit(
                        &mut record,
                        job.trace_id,
                        EventKind::StageCompleted,
                        serde_json::json!({
                            "stage": stage_name,
                            "progress": progress,
                            "extracted": output.extracted,
                        }),
                    )
                    .await?;
                    debug!(photo_id = %record.id, stage = stage_name, progress, "stage completed");
                }
                Err(StageError::Retryable(reason)) => {
                    // Leave the stage pending so the retry re-runs it.
                    record.stage_pending(stage_name, Utc::now());
                    self.persist(&record).await?;
                    warn!(photo_id = %record.id, stage = stage_name, reason, "retryable stage failure");
                    return Ok(ExecOutcome::Retry(format!("stage '{stage_name}': {reason}")));
                }
                Err(StageError::Fatal(reason)) => {
                    record.stage_failed(stage_name, 0, Utc::now());
                    record
                        .fail(format!("stage '{stage_name}': {reason}"), Utc::now())
                        .map_err(|err| ExecOutcome::Retry(err.to_string()))?;
                    self.persist_and_emit(
                        &mut record,
                        job.trace_id,
                        EventKind::ProcessingFailed,
                        serde_json::json!({
                            "stage": stage_name,
                            "error": reason,
                        }),
                    )
                    .await?;
                    warn!(photo_id = %record.id, stage = stage_name, reason, "fatal stage failure");
                    return Ok(ExecOutcome::Fatal(format!("stage '{stage_name}': {reason}")));
                }
                Err(StageError::Cancelled) => {
                    return self.settle_cancelled(&mut record, job.trace_id).await;
                }
            }
        }

        let completed_at = Utc::now();
        record
            .complete(completed_at)
            .map_err(|err| ExecOutcome::Retry(err.to_string()))?;
        let duration_ms = record
            .started_at
            .map(|started| (completed_at - started).num_milliseconds())
            .unwrap_or_default();
        let artifacts_len = record.artifacts.len();
        self.persist_and_emit(
            &mut record,
            job.trace_id,
            EventKind::ProcessingCompleted,
            serde_json::json!({
                "artifacts": artifacts_len,
                "duration_ms": duration_ms,
            }),
        )
        .await?;
        info!(photo_id = %record.id, duration_ms, "processing completed");
        Ok(ExecOutcome::Completed)
    }

    /// Run one stage under the timeout and the cancellation grace window.
    async fn run_stage_guarded(
        &self,
        pipeline: &Pipeline,
        index: usize,
        ctx: &StageContext,
        mut cancelled: watch::Receiver<bool>,
    ) -> Result<StageOutput, StageError> {
        let stage = &pipeline.stages[index];
        let run = stage.run(ctx);
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => result,
            _ = tokio::time::sleep(self.config.stage_timeout) => {
                Err(StageError::Retryable(format!(
                    "timed out after {}ms",
                    self.config.stage_timeout.as_millis()
                )))
            }
            _ = cancelled.changed() => {
                // Give the stage its grace window to unwind, then abandon it.
                tokio::select! {
                    result = &mut run => result,
                    _ = tokio::time::sleep(self.config.cancel_grace) => Err(StageError::Cancelled),
                }
            }
        }
    }

    async fn settle_cancelled(
        &self,
        record: &mut PhotoRecord,
        trace_id: TraceId,
    ) -> Result<ExecOutcome, ExecOutcome> {
        record
            .cancel(Utc::now())
            .map_err(|err| ExecOutcome::Retry(err.to_string()))?;
        self.persist_and_emit(
            record,
            trace_id,
            EventKind::PhotoCancelled,
            serde_json::json!({}),
        )
        .await?;
        info!(photo_id = %record.id, "processing cancelled");
        Ok(ExecOutcome::Cancelled)
    }

    /// Persist produced artifacts. A key that already exists is skipped, so
    /// a retried stage never rewrites bytes it already uploaded.
    async fn write_artifacts(
        &self,
        record: &mut PhotoRecord,
        output: &StageOutput,
    ) -> Result<(), ExecOutcome> {
        for produced in &output.artifacts {
            let key = artifact_key(record.id, &produced.role);
            let exists = match self.blob.stat(&record.bucket, &key).await {
                Ok(_) => true,
                Err(BlobError::NotFound { .. }) => false,
                Err(err) => return Err(ExecOutcome::Retry(format!("artifact stat: {err}"))),
            };
            if !exists {
                self.blob
                    .put(
                        &record.bucket,
                        &key,
                        produced.bytes.clone(),
                        PutOptions {
                            content_type: Some(produced.content_type.clone()),
                            metadata: Default::default(),
                        },
                    )
                    .await
                    .map_err(|err| ExecOutcome::Retry(format!("artifact put: {err}")))?;
            }
            record.add_artifact(
                Artifact {
                    role: produced.role.clone(),
                    blob_key: key,
                    width: produced.width,
                    height: produced.height,
                    size_bytes: produced.bytes.len() as u64,
                },
                Utc::now(),
            );
        }
        Ok(())
    }

    async fn fetch_blob(&self, job: &Job) -> Result<Bytes, ExecOutcome> {
        let attempts = self.config.fetch_attempts.max(1);
        for attempt in 1..=attempts {
            match self.blob.get(&job.bucket, &job.blob_key).await {
                Ok(bytes) => return Ok(bytes),
                Err(BlobError::NotFound { .. }) => {
                    return Err(ExecOutcome::Fatal(format!(
                        "original blob missing: {}/{}",
                        job.bucket, job.blob_key
                    )));
                }
                Err(err) if attempt < attempts => {
                    debug!(job_id = %job.job_id, attempt, %err, "blob fetch failed, retrying");
                    tokio::time::sleep(self.config.fetch_retry_delay).await;
                }
                Err(err) => {
                    return Err(ExecOutcome::Retry(format!("blob fetch failed: {err}")));
                }
            }
        }
        unreachable!("fetch loop returns on final attempt");
    }

    async fn load_record(&self, job: &Job) -> Result<PhotoRecord, ExecOutcome> {
        match self.meta.get(job.photo_id).await {
            Ok(record) => Ok(record),
            Err(MetadataError::NotFound(id)) => Err(ExecOutcome::Fatal(format!(
                "photo record missing: {id}"
            ))),
            Err(err) => Err(ExecOutcome::Retry(format!("metadata load: {err}"))),
        }
    }

    async fn persist(&self, record: &PhotoRecord) -> Result<(), ExecOutcome> {
        self.meta
            .update(record.clone())
            .await
            .map_err(|err| ExecOutcome::Retry(format!("metadata update: {err}")))
    }

    /// Bump the photo's sequence, persist the record, then publish. The
    /// persist-first order makes the sequence durable before anyone can see
    /// the event that carries it.
    async fn persist_and_emit(
        &self,
        record: &mut PhotoRecord,
        trace_id: TraceId,
        kind: EventKind,
        data: serde_json::Value,
    ) -> Result<(), ExecOutcome> {
        let sequence = record.next_event_seq();
        self.persist(record).await?;

        let event = PhotoEvent::new(
            kind,
            data,
            EventMetadata::for_photo(
                self.config.source.clone(),
                trace_id,
                record.id,
                sequence,
                Utc::now(),
            )
            .with_client(record.client_id.clone())
            .with_session(record.session_id.clone()),
        );
        if let Err(publish_err) = self.bus.publish(event).await {
            // At-least-once with replay-through-ingress: a lost event is
            // recoverable from record state, a blocked pipeline is not.
            warn!(photo_id = %record.id, %publish_err, "event publish failed");
        }
        Ok(())
    }
}
