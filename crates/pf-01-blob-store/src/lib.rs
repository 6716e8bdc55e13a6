//! # Blob Store - Opaque Key/Bytes Storage Contract
//!
//! Subsystem 1. The platform never talks to object storage directly; it goes
//! through the [`BlobStore`] trait. Production deployments back the trait
//! with an S3-compatible service; this crate ships an in-memory reference
//! implementation used by the single-node runtime and the test suite.
//!
//! Keys are ASCII-safe strings. `put` is idempotent for identical bytes at
//! an identical key (checksum-verified), and `remove` of an absent key is a
//! success.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod contract;
pub mod memory;
pub mod url_cache;

// Re-export main types
pub use contract::{BlobError, BlobStore, ObjectMeta, PutOptions, PutResult, UrlMethod};
pub use memory::InMemoryBlobStore;
pub use url_cache::PresignedUrlCache;
