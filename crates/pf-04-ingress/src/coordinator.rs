//! # Photo Ingress
//!
//! The coordinator that turns a raw upload buffer into a durable photo:
//! blob write-ahead, metadata insert with compensation, idempotent enqueue
//! with bounded retry, and the `photo.uploaded` event.

use crate::keys::{derive_bucket, upload_blob_key, BucketConfig};
use crate::validate::validate_upload;
use crate::{DEFAULT_MAX_UPLOAD_BYTES, LARGE_IMAGE_THRESHOLD_BYTES};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use pf_01_blob_store::{BlobError, BlobStore, PresignedUrlCache, PutOptions, UrlMethod};
use pf_02_metadata_store::{MetadataError, MetadataStore};
use pf_03_job_queue::{JobQueue, QueueError};
use sha2::{Digest, Sha256};
use shared_bus::EventPublisher;
use shared_types::{
    ClientId, Component, ComponentError, ComponentErrorKind, ComponentHealth, ComponentStatus,
    EventKind, EventMetadata, Job, JobOptions, MediaType, PhotoEvent, PhotoId, PhotoRecord,
    PlatformError, SessionId, TraceId, UserId,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Ingress configuration.
#[derive(Debug, Clone)]
pub struct IngressConfig {
    /// Upload size cap.
    pub max_upload_bytes: u64,
    /// Media types ingress accepts.
    pub allowed_types: Vec<MediaType>,
    /// Pipeline enqueued for every accepted photo.
    pub pipeline_name: String,
    /// Stage names of that pipeline, frozen into the job.
    pub stages: Vec<String>,
    /// Options applied to every processing job.
    pub job_options: JobOptions,
    /// Uploads above this (non-video) go to the large bucket.
    pub large_image_threshold: u64,
    /// Bucket partitioning.
    pub buckets: BucketConfig,
    /// Reject a re-upload of bytes this client already owns.
    pub dedup_by_checksum: bool,
    /// Refuse uploads while the queue backlog exceeds this depth.
    pub max_queue_depth: Option<usize>,
    /// Attempts for the post-insert enqueue before surfacing failure.
    pub enqueue_attempts: u32,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_types: vec![
                MediaType::Jpeg,
                MediaType::Png,
                MediaType::Gif,
                MediaType::Webp,
                MediaType::Tiff,
                MediaType::Bmp,
            ],
            pipeline_name: "full_processing".to_string(),
            stages: vec![
                "validation".to_string(),
                "metadata_extraction".to_string(),
                "thumbnails".to_string(),
                "optimization".to_string(),
            ],
            job_options: JobOptions::default(),
            large_image_threshold: LARGE_IMAGE_THRESHOLD_BYTES,
            buckets: BucketConfig::default(),
            dedup_by_checksum: false,
            max_queue_depth: None,
            enqueue_attempts: 5,
        }
    }
}

/// Caller-supplied upload context.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Client-side filename.
    pub original_name: String,
    /// Declared MIME type, when the client sent one.
    pub content_type: Option<String>,
    /// Uploading client. Required.
    pub client_id: ClientId,
    /// Upload session.
    pub session_id: Option<SessionId>,
    /// Owning user.
    pub user_id: Option<UserId>,
    /// Free-form metadata stored on the blob object.
    pub extra_metadata: BTreeMap<String, String>,
}

/// What the caller gets back once the upload is durable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// The new photo's id.
    pub photo_id: PhotoId,
    /// Where the original bytes live.
    pub blob_key: String,
    /// Blob-store partition.
    pub bucket: String,
    /// Content checksum (SHA-256 hex).
    pub checksum: String,
    /// Trace id for correlating the event stream.
    pub trace_id: TraceId,
    /// Whether checksum dedup returned an existing photo instead of
    /// creating a new one.
    pub deduplicated: bool,
}

/// The ingress coordinator.
pub struct PhotoIngress {
    blob: Arc<dyn BlobStore>,
    meta: Arc<dyn MetadataStore>,
    queue: JobQueue,
    bus: Arc<dyn EventPublisher>,
    url_cache: PresignedUrlCache,
    config: IngressConfig,
    ready: AtomicBool,
    uploads_accepted: AtomicU64,
    uploads_rejected: AtomicU64,
}

impl PhotoIngress {
    /// Wire a coordinator over its four collaborators.
    #[must_use]
    pub fn new(
        blob: Arc<dyn BlobStore>,
        meta: Arc<dyn MetadataStore>,
        queue: JobQueue,
        bus: Arc<dyn EventPublisher>,
        config: IngressConfig,
    ) -> Self {
        Self {
            blob,
            meta,
            queue,
            bus,
            url_cache: PresignedUrlCache::new(),
            config,
            ready: AtomicBool::new(false),
            uploads_accepted: AtomicU64::new(0),
            uploads_rejected: AtomicU64::new(0),
        }
    }

    /// Accept an upload.
    ///
    /// On success one blob object, one metadata row, and one queued job
    /// exist, and a `photo.uploaded` event has been offered to the bus.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` without side effects; `TransientBackend` when a
    /// backend stays down through the retry budget (any partial write has
    /// been compensated or is reachable from the metadata row).
    pub async fn upload(
        &self,
        bytes: Bytes,
        options: UploadOptions,
    ) -> Result<UploadReceipt, PlatformError> {
        self.ensure_ready()?;

        let media_type = validate_upload(
            &bytes,
            &options.original_name,
            &options.client_id.0,
            options.content_type.as_deref(),
            self.config.max_upload_bytes,
            &self.config.allowed_types,
        )
        .map_err(|err| {
            self.uploads_rejected.fetch_add(1, Ordering::Relaxed);
            err
        })?;

        let checksum = hex::encode(Sha256::digest(&bytes));

        if self.config.dedup_by_checksum {
            if let Some(existing) = self
                .meta
                .find_by_checksum(&options.client_id, &checksum)
                .await
                .map_err(map_meta_err)?
            {
                debug!(photo_id = %existing.id, "upload deduplicated by checksum");
                return Ok(UploadReceipt {
                    photo_id: existing.id,
                    blob_key: existing.blob_key,
                    bucket: existing.bucket,
                    checksum,
                    trace_id: TraceId::generate(),
                    deduplicated: true,
                });
            }
        }

        if let Some(depth_cap) = self.config.max_queue_depth {
            let stats = self.queue.stats().await;
            let backlog = stats.waiting + stats.delayed + stats.active;
            if backlog > depth_cap {
                self.uploads_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(PlatformError::transient(
                    "job-queue",
                    format!("backlog {backlog} above ingress cap {depth_cap}"),
                ));
            }
        }

        let photo_id = PhotoId::generate();
        let trace_id = TraceId::generate();
        let now = Utc::now();
        let size_bytes = bytes.len() as u64;
        let bucket = derive_bucket(
            size_bytes,
            media_type,
            self.config.large_image_threshold,
            &self.config.buckets,
        );
        let blob_key = upload_blob_key(photo_id, &options.original_name, now);

        // Step 1: blob write-ahead. Failure here leaves no state behind.
        self.blob
            .put(
                &bucket,
                &blob_key,
                bytes,
                PutOptions {
                    content_type: Some(media_type.as_mime().to_string()),
                    metadata: options.extra_metadata.clone(),
                },
            )
            .await
            .map_err(map_blob_err)?;

        // Step 2: metadata insert, compensated by blob delete on failure.
        let mut record = PhotoRecord::new(
            photo_id,
            blob_key.clone(),
            bucket.clone(),
            size_bytes,
            media_type,
            options.original_name.clone(),
            checksum.clone(),
            options.client_id.clone(),
            now,
        );
        if let Some(session_id) = options.session_id.clone() {
            record = record.with_session(session_id);
        }
        if let Some(user_id) = options.user_id.clone() {
            record = record.with_user(user_id);
        }
        // Sequence 1 belongs to `photo.uploaded` and is persisted with the
        // row so the claiming worker continues from 2.
        let upload_seq = record.next_event_seq();

        if let Err(insert_err) = self.meta.insert(record.clone()).await {
            // Best-effort compensation; an orphaned blob is reclaimable by
            // the consistency sweeper, a dangling row is not.
            if let Err(cleanup_err) = self.blob.remove(&bucket, &blob_key).await {
                error!(
                    %photo_id,
                    %cleanup_err,
                    "compensating blob delete failed; orphan left for sweeper"
                );
            } else {
                info!(%photo_id, "compensated blob write after metadata failure");
            }
            self.uploads_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(map_meta_err(insert_err));
        }

        // Step 3: fire-and-forget event, before the job becomes claimable.
        // Sequence 1 must reach the bus before any worker can publish
        // sequence 2; the queue entry, not the event, guarantees processing.
        let event = PhotoEvent::new(
            EventKind::PhotoUploaded,
            serde_json::json!({
                "blob_key": blob_key,
                "bucket": bucket,
                "size_bytes": size_bytes,
                "mime_type": media_type.as_mime(),
                "original_name": options.original_name,
            }),
            EventMetadata::for_photo("ingress", trace_id, photo_id, upload_seq, Utc::now())
                .with_client(options.client_id.clone())
                .with_session(options.session_id.clone()),
        );
        if let Err(publish_err) = self.bus.publish(event).await {
            warn!(%photo_id, %publish_err, "uploaded event publish failed");
        }

        // Step 4: enqueue under the idempotent photo job id.
        let job = Job::for_photo(
            photo_id,
            blob_key.clone(),
            bucket.clone(),
            self.config.pipeline_name.clone(),
            self.config.stages.clone(),
            &self.config.job_options,
            trace_id,
            now,
        );
        self.enqueue_with_retry(job).await?;

        self.uploads_accepted.fetch_add(1, Ordering::Relaxed);
        info!(%photo_id, bucket, size_bytes, "upload accepted");
        Ok(UploadReceipt {
            photo_id,
            blob_key,
            bucket,
            checksum,
            trace_id,
            deduplicated: false,
        })
    }

    /// Fetch a photo record (the reconnect replay path).
    pub async fn get_photo(&self, photo_id: PhotoId) -> Result<PhotoRecord, PlatformError> {
        self.ensure_ready()?;
        self.meta.get(photo_id).await.map_err(map_meta_err)
    }

    /// A client's photos, newest first.
    pub async fn list_client_photos(
        &self,
        client_id: &ClientId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PhotoRecord>, PlatformError> {
        self.ensure_ready()?;
        self.meta
            .list_by_client(client_id, limit, offset)
            .await
            .map_err(map_meta_err)
    }

    /// Presigned download URL for the original, served through the cache.
    pub async fn download_url(
        &self,
        photo_id: PhotoId,
        expires_secs: u64,
    ) -> Result<String, PlatformError> {
        self.ensure_ready()?;
        let record = self.meta.get(photo_id).await.map_err(map_meta_err)?;
        if let Some(url) = self
            .url_cache
            .get(UrlMethod::Get, &record.bucket, &record.blob_key)
        {
            return Ok(url);
        }
        let url = self
            .blob
            .presigned_url(UrlMethod::Get, &record.bucket, &record.blob_key, expires_secs)
            .await
            .map_err(map_blob_err)?;
        self.url_cache
            .insert(UrlMethod::Get, &record.bucket, &record.blob_key, url.clone());
        Ok(url)
    }

    /// Delete a photo, cascading artifacts, the original blob, the metadata
    /// row, and cached URLs. Deleting an absent photo is a success.
    pub async fn delete_photo(&self, photo_id: PhotoId) -> Result<bool, PlatformError> {
        self.ensure_ready()?;
        let mut record = match self.meta.get(photo_id).await {
            Ok(record) => record,
            Err(MetadataError::NotFound(_)) => return Ok(false),
            Err(other) => return Err(map_meta_err(other)),
        };

        for artifact in &record.artifacts {
            self.blob
                .remove(&record.bucket, &artifact.blob_key)
                .await
                .map_err(map_blob_err)?;
        }
        self.blob
            .remove(&record.bucket, &record.blob_key)
            .await
            .map_err(map_blob_err)?;
        self.meta.delete(photo_id).await.map_err(map_meta_err)?;

        self.url_cache.invalidate_prefix(&record.bucket, &record.blob_key);
        self.url_cache
            .invalidate_prefix(&record.bucket, &format!("artifacts/{photo_id}/"));

        let sequence = record.next_event_seq();
        let event = PhotoEvent::new(
            EventKind::PhotoDeleted,
            serde_json::json!({"blob_key": record.blob_key}),
            EventMetadata::for_photo("ingress", TraceId::generate(), photo_id, sequence, Utc::now())
                .with_client(record.client_id.clone())
                .with_session(record.session_id.clone()),
        );
        if let Err(publish_err) = self.bus.publish(event).await {
            warn!(%photo_id, %publish_err, "deleted event publish failed");
        }
        info!(%photo_id, "photo deleted");
        Ok(true)
    }

    async fn enqueue_with_retry(&self, job: Job) -> Result<(), PlatformError> {
        let mut delay = Duration::from_millis(100);
        let attempts = self.config.enqueue_attempts.max(1);
        for attempt in 1..=attempts {
            match self.queue.enqueue(job.clone(), self.config.job_options.clone()).await {
                Ok(_) => return Ok(()),
                Err(QueueError::BackendUnavailable(detail)) if attempt < attempts => {
                    warn!(job_id = %job.job_id, attempt, detail, "enqueue failed, backing off");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(2));
                }
                Err(err) => return Err(map_queue_err(err)),
            }
        }
        unreachable!("retry loop returns on final attempt");
    }

    fn ensure_ready(&self) -> Result<(), PlatformError> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PlatformError::transient("ingress", "not started"))
        }
    }
}

fn map_blob_err(err: BlobError) -> PlatformError {
    match err {
        BlobError::NotFound { bucket, key } => {
            PlatformError::not_found("blob", format!("{bucket}/{key}"))
        }
        BlobError::InvalidKey(key) => {
            PlatformError::Internal(format!("derived an invalid blob key: {key}"))
        }
        BlobError::Unavailable(detail) => PlatformError::transient("blob-store", detail),
    }
}

fn map_meta_err(err: MetadataError) -> PlatformError {
    match err {
        MetadataError::NotFound(id) => PlatformError::not_found("photo", id.to_string()),
        MetadataError::AlreadyExists(id) => {
            PlatformError::Conflict(format!("photo record already exists: {id}"))
        }
        MetadataError::Unavailable(detail) => PlatformError::transient("metadata-store", detail),
    }
}

fn map_queue_err(err: QueueError) -> PlatformError {
    match err {
        QueueError::BackendUnavailable(detail) => PlatformError::transient("job-queue", detail),
        QueueError::Closed => PlatformError::transient("job-queue", "queue closed"),
        QueueError::JobNotFound(id) => PlatformError::not_found("job", id.to_string()),
        QueueError::Conflict(detail) => PlatformError::Conflict(detail),
        QueueError::LimiterBusy => PlatformError::transient("job-queue", "claim limiter saturated"),
    }
}

#[async_trait]
impl Component for PhotoIngress {
    fn name(&self) -> &'static str {
        "ingress"
    }

    async fn start(&self) -> Result<(), ComponentError> {
        if !self.blob.ping().await {
            return Err(ComponentError::new(
                self.name(),
                ComponentErrorKind::BackendUnreachable,
                "blob store did not answer ping",
            ));
        }
        if !self.meta.ping().await {
            return Err(ComponentError::new(
                self.name(),
                ComponentErrorKind::BackendUnreachable,
                "metadata store did not answer ping",
            ));
        }
        self.ready.store(true, Ordering::SeqCst);
        info!("ingress ready");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ComponentError> {
        self.ready.store(false, Ordering::SeqCst);
        info!("ingress stopped");
        Ok(())
    }

    async fn health(&self) -> ComponentHealth {
        let status = if self.ready.load(Ordering::SeqCst) {
            ComponentStatus::Healthy
        } else {
            ComponentStatus::Stopped
        };
        ComponentHealth {
            name: self.name().to_string(),
            status,
            details: serde_json::json!({
                "uploads_accepted": self.uploads_accepted.load(Ordering::Relaxed),
                "uploads_rejected": self.uploads_rejected.load(Ordering::Relaxed),
                "url_cache_entries": self.url_cache.len(),
            }),
        }
    }
}
