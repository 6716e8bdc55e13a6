//! # Bucket and Key Derivation
//!
//! Blob keys are date-partitioned and self-describing:
//! `photos/{yyyy-mm-dd}/{unix_ms}/{photo_id}_{sanitized_name}`.

use chrono::{DateTime, Utc};
use shared_types::{MediaType, PhotoId};

/// Logical blob-store partitions.
#[derive(Debug, Clone)]
pub struct BucketConfig {
    /// Images at or below the large threshold.
    pub default_bucket: String,
    /// Images above the large threshold.
    pub large_bucket: String,
    /// Video uploads.
    pub video_bucket: String,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            default_bucket: "photos".to_string(),
            large_bucket: "photos-large".to_string(),
            video_bucket: "videos".to_string(),
        }
    }
}

/// Pick the bucket for an upload from its size and type.
#[must_use]
pub fn derive_bucket(
    size_bytes: u64,
    media_type: MediaType,
    large_threshold: u64,
    buckets: &BucketConfig,
) -> String {
    if media_type.is_video() {
        buckets.video_bucket.clone()
    } else if size_bytes > large_threshold {
        buckets.large_bucket.clone()
    } else {
        buckets.default_bucket.clone()
    }
}

/// Make a validated original name key-safe: spaces become underscores.
/// Validation has already restricted the charset to `[A-Za-z0-9_.\- ]`.
#[must_use]
pub fn sanitize_filename(original_name: &str) -> String {
    original_name.replace(' ', "_")
}

/// Build the blob key for an accepted upload.
#[must_use]
pub fn upload_blob_key(photo_id: PhotoId, original_name: &str, now: DateTime<Utc>) -> String {
    format!(
        "photos/{}/{}/{photo_id}_{}",
        now.format("%Y-%m-%d"),
        now.timestamp_millis(),
        sanitize_filename(original_name)
    )
}
