//! # Ingress Coordinator - Transactional Upload
//!
//! Subsystem 4. The write path every photo enters through:
//!
//! 1. validate the buffer and its declared identity
//! 2. write-ahead the blob (no metadata row exists yet on failure)
//! 3. insert the metadata row, compensating with a best-effort blob delete
//!    if the insert fails
//! 4. publish `photo.uploaded` (sequence 1), fire-and-forget, before the
//!    job exists so no worker can put sequence 2 on the bus first
//! 5. enqueue the processing job under the idempotent `photo:{id}` key,
//!    retrying with backoff
//!
//! The caller gets its receipt after step 5: the durable queue entry, not
//! the event, is what guarantees processing.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod coordinator;
pub mod keys;
pub mod validate;

// Re-export main types
pub use coordinator::{IngressConfig, PhotoIngress, UploadOptions, UploadReceipt};
pub use keys::{derive_bucket, sanitize_filename, upload_blob_key, BucketConfig};
pub use validate::validate_upload;

/// Default upload size cap (50 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Uploads above this land in the large-image bucket (10 MiB).
pub const LARGE_IMAGE_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;
