//! # Pipeline Engine - Stage-Based Photo Processing
//!
//! Subsystem 5. A pipeline is an ordered sequence of named stages; the
//! executor fetches the original blob, runs the stages with per-stage
//! progress and timeouts, writes derived artifacts back to the blob store,
//! updates the photo record transactionally with status, and emits
//! lifecycle events with the photo's own sequence counter.
//!
//! Registered pipelines are immutable: `full_processing` runs
//! `validation, metadata_extraction, thumbnails, optimization`;
//! `quick_processing` omits `optimization`.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod executor;
pub mod registry;
pub mod stage;
pub mod stages;

// Re-export main types
pub use executor::{ExecOutcome, ExecutorConfig, PipelineExecutor};
pub use registry::{Pipeline, PipelineRegistry};
pub use stage::{ProducedArtifact, Stage, StageContext, StageError, StageOutput};

/// Name of the default full pipeline.
pub const FULL_PIPELINE: &str = "full_processing";

/// Name of the pipeline that skips optimization.
pub const QUICK_PIPELINE: &str = "quick_processing";

/// Blob key of a derived artifact.
#[must_use]
pub fn artifact_key(photo_id: shared_types::PhotoId, role: &str) -> String {
    format!("artifacts/{photo_id}/{role}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::PhotoId;

    #[test]
    fn test_artifact_key_shape() {
        let photo_id = PhotoId::generate();
        assert_eq!(
            artifact_key(photo_id, "thumb_small"),
            format!("artifacts/{photo_id}/thumb_small")
        );
    }
}
