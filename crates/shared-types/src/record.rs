//! # Photo Record - The Central Entity
//!
//! A `PhotoRecord` is created by ingress after the blob is durably stored and
//! mutated only by the single actor currently holding its mutation right:
//! ingress during creation, then the worker holding the queue's exclusive
//! claim, then (after terminal failure) the dead-letter compensator.
//!
//! ## Invariants Enforced
//!
//! - `queued` records have no `started_at`, no artifacts, no error
//! - `in_progress` records have `started_at` set and no `completed_at`
//! - terminal records have `completed_at >= started_at`
//! - `completed` requires every configured stage `done` and no error
//! - `failed` carries an error message
//! - `(updated_at, updated_seq)` strictly increases on every mutation
//!
//! Illegal transitions return [`PlatformError::Conflict`] instead of
//! silently corrupting state.

use crate::errors::PlatformError;
use crate::ids::{ClientId, PhotoId, SessionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// MEDIA TYPES
// =============================================================================

/// Recognized media types.
///
/// Anything unrecognized degrades to `OctetStream`, which ingress accepts
/// only when explicitly whitelisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    /// image/jpeg
    Jpeg,
    /// image/png
    Png,
    /// image/gif
    Gif,
    /// image/webp
    Webp,
    /// image/tiff
    Tiff,
    /// image/bmp
    Bmp,
    /// video/mp4
    Mp4,
    /// video/quicktime
    Quicktime,
    /// application/octet-stream (unrecognized)
    OctetStream,
}

impl MediaType {
    /// Parse a MIME string; unknown types degrade to `OctetStream`.
    #[must_use]
    pub fn from_mime(mime: &str) -> Self {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Self::Jpeg,
            "image/png" => Self::Png,
            "image/gif" => Self::Gif,
            "image/webp" => Self::Webp,
            "image/tiff" => Self::Tiff,
            "image/bmp" => Self::Bmp,
            "video/mp4" => Self::Mp4,
            "video/quicktime" => Self::Quicktime,
            _ => Self::OctetStream,
        }
    }

    /// Canonical MIME rendering.
    #[must_use]
    pub fn as_mime(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Tiff => "image/tiff",
            Self::Bmp => "image/bmp",
            Self::Mp4 => "video/mp4",
            Self::Quicktime => "video/quicktime",
            Self::OctetStream => "application/octet-stream",
        }
    }

    /// Whether this is a still-image type.
    #[must_use]
    pub fn is_image(&self) -> bool {
        matches!(
            self,
            Self::Jpeg | Self::Png | Self::Gif | Self::Webp | Self::Tiff | Self::Bmp
        )
    }

    /// Whether this is a video type.
    #[must_use]
    pub fn is_video(&self) -> bool {
        matches!(self, Self::Mp4 | Self::Quicktime)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_mime())
    }
}

// =============================================================================
// STATUS & STAGE PROGRESS
// =============================================================================

/// Lifecycle status of a photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoStatus {
    /// Accepted by ingress, waiting for a worker.
    Queued,
    /// A worker holds the claim and is running the pipeline.
    InProgress,
    /// Every configured stage finished.
    Completed,
    /// A stage failed fatally or retries were exhausted.
    Failed,
    /// Cooperative cancellation reached the photo.
    Cancelled,
}

impl PhotoStatus {
    /// Terminal statuses never transition again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Per-stage execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// Stage not reached yet.
    Pending,
    /// Stage handler is executing.
    Running,
    /// Stage finished successfully.
    Done,
    /// Stage failed.
    Failed,
}

/// Progress entry for one stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProgress {
    /// Current state of the stage.
    pub state: StageState,
    /// Completion percentage, 0..=100.
    pub percent: u8,
}

impl StageProgress {
    /// A stage that has not started.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            state: StageState::Pending,
            percent: 0,
        }
    }
}

/// A derived object written back by a pipeline stage (e.g., a thumbnail).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Role of the artifact ("thumb_small", "optimized", ...).
    pub role: String,
    /// Key of the derived blob.
    pub blob_key: String,
    /// Pixel width, when meaningful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Pixel height, when meaningful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Size of the derived blob in bytes.
    pub size_bytes: u64,
}

// =============================================================================
// PHOTO RECORD
// =============================================================================

/// The metadata row for one uploaded photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    /// Unique identifier, assigned at ingress.
    pub id: PhotoId,
    /// Pointer into the blob store. Immutable after creation.
    pub blob_key: String,
    /// Logical blob-store partition.
    pub bucket: String,
    /// Original upload size in bytes.
    pub size_bytes: u64,
    /// Recognized media type.
    pub mime_type: MediaType,
    /// Sanitized original filename.
    pub original_name: String,
    /// SHA-256 of the uploaded bytes, hex encoded. Immutable after creation.
    pub checksum: String,
    /// Uploading client.
    pub client_id: ClientId,
    /// Upload session, when provided.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Owning user, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Lifecycle status.
    pub status: PhotoStatus,
    /// Per-stage progress, keyed by stage name.
    pub stage_progress: BTreeMap<String, StageProgress>,
    /// Derived artifacts in production order.
    pub artifacts: Vec<Artifact>,
    /// Failure description. Present iff `status == Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When ingress accepted the upload.
    pub uploaded_at: DateTime<Utc>,
    /// When a worker first claimed the photo.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the photo reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Last mutation time. Never decreases.
    pub updated_at: DateTime<Utc>,
    /// Mutation counter breaking wall-clock ties, so `(updated_at,
    /// updated_seq)` strictly increases.
    pub updated_seq: u64,
    /// Per-photo event sequence counter, owned by whoever holds the
    /// mutation right. Ingress issues 1; the owning worker continues.
    pub event_seq: u64,
}

impl PhotoRecord {
    /// Create a freshly ingested record in `Queued` status.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        id: PhotoId,
        blob_key: impl Into<String>,
        bucket: impl Into<String>,
        size_bytes: u64,
        mime_type: MediaType,
        original_name: impl Into<String>,
        checksum: impl Into<String>,
        client_id: ClientId,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            blob_key: blob_key.into(),
            bucket: bucket.into(),
            size_bytes,
            mime_type,
            original_name: original_name.into(),
            checksum: checksum.into(),
            client_id,
            session_id: None,
            user_id: None,
            status: PhotoStatus::Queued,
            stage_progress: BTreeMap::new(),
            artifacts: Vec::new(),
            error: None,
            uploaded_at,
            started_at: None,
            completed_at: None,
            updated_at: uploaded_at,
            updated_seq: 0,
            event_seq: 0,
        }
    }

    /// Attach a session id.
    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Attach a user id.
    #[must_use]
    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Issue the next per-photo event sequence number.
    ///
    /// Only the actor currently holding the mutation right may call this;
    /// exclusivity of the queue claim makes the sequence totally ordered.
    pub fn next_event_seq(&mut self) -> u64 {
        self.event_seq += 1;
        self.event_seq
    }

    /// Bump `(updated_at, updated_seq)`. Called by every mutator.
    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = self.updated_at.max(now);
        self.updated_seq += 1;
    }

    /// Transition `Queued -> InProgress` and initialize stage slots.
    ///
    /// # Errors
    ///
    /// `Conflict` if the record is not `Queued`.
    pub fn begin_processing(
        &mut self,
        stages: &[String],
        now: DateTime<Utc>,
    ) -> Result<(), PlatformError> {
        if self.status != PhotoStatus::Queued {
            return Err(PlatformError::Conflict(format!(
                "cannot start processing photo {} in status {:?}",
                self.id, self.status
            )));
        }
        self.status = PhotoStatus::InProgress;
        self.started_at = Some(now);
        for stage in stages {
            self.stage_progress
                .entry(stage.clone())
                .or_insert_with(StageProgress::pending);
        }
        self.touch(now);
        Ok(())
    }

    /// Mark a stage as running.
    pub fn stage_running(&mut self, stage: &str, now: DateTime<Utc>) {
        self.stage_progress.insert(
            stage.to_string(),
            StageProgress {
                state: StageState::Running,
                percent: 0,
            },
        );
        self.touch(now);
    }

    /// Mark a stage as done.
    pub fn stage_done(&mut self, stage: &str, now: DateTime<Utc>) {
        self.stage_progress.insert(
            stage.to_string(),
            StageProgress {
                state: StageState::Done,
                percent: 100,
            },
        );
        self.touch(now);
    }

    /// Reset a stage to pending (a retryable abort will re-run it).
    pub fn stage_pending(&mut self, stage: &str, now: DateTime<Utc>) {
        self.stage_progress
            .insert(stage.to_string(), StageProgress::pending());
        self.touch(now);
    }

    /// Mark a stage as failed at the given progress point.
    pub fn stage_failed(&mut self, stage: &str, percent: u8, now: DateTime<Utc>) {
        self.stage_progress.insert(
            stage.to_string(),
            StageProgress {
                state: StageState::Failed,
                percent: percent.min(100),
            },
        );
        self.touch(now);
    }

    /// Record a produced artifact. Re-recording the same role is a no-op,
    /// which makes retried stage writebacks idempotent.
    pub fn add_artifact(&mut self, artifact: Artifact, now: DateTime<Utc>) {
        if self.artifacts.iter().any(|a| a.role == artifact.role) {
            return;
        }
        self.artifacts.push(artifact);
        self.touch(now);
    }

    /// Transition `InProgress -> Completed`.
    ///
    /// # Errors
    ///
    /// `Conflict` if the record is not `InProgress` or a stage is unfinished.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), PlatformError> {
        if self.status != PhotoStatus::InProgress {
            return Err(PlatformError::Conflict(format!(
                "cannot complete photo {} in status {:?}",
                self.id, self.status
            )));
        }
        if let Some((stage, progress)) = self
            .stage_progress
            .iter()
            .find(|(_, p)| p.state != StageState::Done)
        {
            return Err(PlatformError::Conflict(format!(
                "cannot complete photo {}: stage '{stage}' is {:?}",
                self.id, progress.state
            )));
        }
        self.status = PhotoStatus::Completed;
        self.error = None;
        self.completed_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Transition to `Failed` with an error message.
    ///
    /// # Errors
    ///
    /// `Conflict` if the record is already terminal.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<(), PlatformError> {
        if self.status.is_terminal() {
            return Err(PlatformError::Conflict(format!(
                "cannot fail photo {} in terminal status {:?}",
                self.id, self.status
            )));
        }
        self.status = PhotoStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Transition to `Cancelled`.
    ///
    /// # Errors
    ///
    /// `Conflict` if the record is already terminal.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), PlatformError> {
        if self.status.is_terminal() {
            return Err(PlatformError::Conflict(format!(
                "cannot cancel photo {} in terminal status {:?}",
                self.id, self.status
            )));
        }
        self.status = PhotoStatus::Cancelled;
        self.completed_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Aggregate pipeline completion, 0..=100.
    #[must_use]
    pub fn percent_complete(&self) -> u8 {
        if self.stage_progress.is_empty() {
            return 0;
        }
        let done = self
            .stage_progress
            .values()
            .filter(|p| p.state == StageState::Done)
            .count();
        ((done * 100) / self.stage_progress.len()) as u8
    }
}
