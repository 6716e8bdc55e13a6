//! # Blob Store Contract
//!
//! The outbound port every blob-store adapter implements.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur against the blob store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BlobError {
    /// No object at the key.
    #[error("object not found: {bucket}/{key}")]
    NotFound {
        /// Bucket that was queried.
        bucket: String,
        /// Key that missed.
        key: String,
    },

    /// Keys must be non-empty ASCII without path tricks.
    #[error("invalid blob key: {0}")]
    InvalidKey(String),

    /// The store is temporarily unreachable. Retryable.
    #[error("blob store unavailable: {0}")]
    Unavailable(String),
}

impl BlobError {
    /// Whether a retry may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// HTTP method a presigned URL authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlMethod {
    /// Download.
    Get,
    /// Upload.
    Put,
}

impl UrlMethod {
    /// Rendering used inside the signed payload.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
        }
    }
}

/// Options accepted on `put`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Content type stored alongside the object.
    pub content_type: Option<String>,
    /// Free-form object metadata.
    pub metadata: BTreeMap<String, String>,
}

/// Result of a successful `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    /// Content hash of the stored bytes.
    pub etag: String,
    /// Stored size in bytes.
    pub size: u64,
}

/// Metadata about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Bucket holding the object.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Content hash.
    pub etag: String,
    /// Last write time.
    pub last_modified: DateTime<Utc>,
    /// Stored content type, when provided.
    pub content_type: Option<String>,
    /// Free-form object metadata.
    pub metadata: BTreeMap<String, String>,
}

/// Opaque key→bytes store with presigned retrieval URLs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes at a key. Idempotent for identical bytes at an identical
    /// key: the existing etag is returned and nothing is rewritten.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        options: PutOptions,
    ) -> Result<PutResult, BlobError>;

    /// Fetch the bytes at a key.
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, BlobError>;

    /// Fetch object metadata without the payload.
    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectMeta, BlobError>;

    /// Remove an object. Removing an absent key is a success.
    async fn remove(&self, bucket: &str, key: &str) -> Result<(), BlobError>;

    /// Produce a URL usable by external clients for `expires_secs` seconds.
    async fn presigned_url(
        &self,
        method: UrlMethod,
        bucket: &str,
        key: &str,
        expires_secs: u64,
    ) -> Result<String, BlobError>;

    /// List object metadata under a prefix. The sequence is finite and
    /// materialized; it is not restartable mid-stream.
    async fn list(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<ObjectMeta>, BlobError>;

    /// Cheap liveness probe for readiness gating.
    async fn ping(&self) -> bool;
}

/// Validate a key: non-empty printable ASCII, no parent-directory segments.
pub(crate) fn validate_key(key: &str) -> Result<(), BlobError> {
    if key.is_empty()
        || !key.chars().all(|c| c.is_ascii_graphic() || c == ' ')
        || key.split('/').any(|segment| segment == "..")
    {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}
