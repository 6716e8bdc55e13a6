//! # Stage Contract
//!
//! A stage is a pure async function over the photo context: it may read the
//! original bytes, produce derived artifacts, and extract metadata, but it
//! never touches the stores or the bus itself. The executor owns all
//! side effects, which is what makes retried stages safe.

use async_trait::async_trait;
use bytes::Bytes;
use shared_types::{PhotoRecord, TraceId};
use thiserror::Error;
use tokio::sync::watch;

/// Why a stage could not finish.
///
/// Retryable-vs-fatal is the stage's own declaration: the executor converts
/// retryable failures into queue nacks (backoff retry) and fatal ones into
/// a terminal `failed` photo.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    /// Transient trouble (backend hiccup, resource pressure). The job is
    /// worth retrying.
    #[error("retryable stage failure: {0}")]
    Retryable(String),

    /// The input itself is unprocessable (corrupt image, unsupported
    /// format). Retrying cannot help.
    #[error("fatal stage failure: {0}")]
    Fatal(String),

    /// The stage observed the cancellation signal and unwound.
    #[error("stage cancelled")]
    Cancelled,
}

/// A derived object a stage wants persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedArtifact {
    /// Artifact role ("thumb_small", "optimized", ...).
    pub role: String,
    /// Encoded bytes.
    pub bytes: Bytes,
    /// MIME type of the encoded bytes.
    pub content_type: String,
    /// Pixel width, when meaningful.
    pub width: Option<u32>,
    /// Pixel height, when meaningful.
    pub height: Option<u32>,
}

/// What a successful stage returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutput {
    /// Artifacts to persist, in production order.
    pub artifacts: Vec<ProducedArtifact>,
    /// Extracted metadata to attach to the stage-completed event.
    pub extracted: Option<serde_json::Value>,
}

/// Everything a stage may look at.
pub struct StageContext {
    /// Snapshot of the record at stage start.
    pub photo: PhotoRecord,
    /// The original uploaded bytes.
    pub bytes: Bytes,
    /// Trace id for log correlation.
    pub trace_id: TraceId,
    /// Cancellation signal; flips to `true` when the worker drains.
    pub cancelled: watch::Receiver<bool>,
}

impl StageContext {
    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }
}

/// A named, ordered unit of processing within a pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable stage name; keys `stage_progress` and event payloads.
    fn name(&self) -> &'static str;

    /// Run the stage to completion or error. Long stages should check
    /// `ctx.is_cancelled()` between expensive steps.
    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, StageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_classification() {
        assert_ne!(
            StageError::Retryable("net".into()),
            StageError::Fatal("corrupt".into())
        );
    }

    #[test]
    fn test_context_cancellation_flag() {
        let (tx, rx) = watch::channel(false);
        let ctx = StageContext {
            photo: sample_record(),
            bytes: Bytes::new(),
            trace_id: TraceId::generate(),
            cancelled: rx,
        };
        assert!(!ctx.is_cancelled());
        tx.send(true).expect("send");
        assert!(ctx.is_cancelled());
    }

    fn sample_record() -> PhotoRecord {
        use chrono::Utc;
        use shared_types::{ClientId, MediaType, PhotoId};
        PhotoRecord::new(
            PhotoId::generate(),
            "k",
            "photos",
            1,
            MediaType::Png,
            "a.png",
            "sum",
            ClientId::from("c1"),
            Utc::now(),
        )
    }
}
