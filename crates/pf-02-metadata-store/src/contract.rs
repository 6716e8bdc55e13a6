//! # Metadata Store Contract
//!
//! The outbound port every metadata-store adapter implements.

use async_trait::async_trait;
use shared_types::{ClientId, PhotoId, PhotoRecord, PhotoStatus, UserId};
use thiserror::Error;

/// Errors that can occur against the metadata store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetadataError {
    /// No row for the id.
    #[error("photo record not found: {0}")]
    NotFound(PhotoId),

    /// Insert of an id that already exists.
    #[error("photo record already exists: {0}")]
    AlreadyExists(PhotoId),

    /// The store is temporarily unreachable. Retryable.
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),
}

impl MetadataError {
    /// Whether a retry may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Filter for `count` queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhotoFilter {
    /// Restrict to one client.
    pub client_id: Option<ClientId>,
    /// Restrict to one user.
    pub user_id: Option<UserId>,
    /// Restrict to one status.
    pub status: Option<PhotoStatus>,
}

impl PhotoFilter {
    /// Whether a record passes the filter.
    #[must_use]
    pub fn matches(&self, record: &PhotoRecord) -> bool {
        self.client_id
            .as_ref()
            .map_or(true, |c| &record.client_id == c)
            && self
                .user_id
                .as_ref()
                .map_or(true, |u| record.user_id.as_ref() == Some(u))
            && self.status.map_or(true, |s| record.status == s)
    }
}

/// A buffered multi-row transaction.
///
/// Mutations are staged in memory and applied atomically on `commit`;
/// dropping the transaction (or calling `rollback`) discards them. Staged
/// operations are validated at commit time, so a transaction whose insert
/// collides or whose update misses applies nothing.
#[async_trait]
pub trait MetadataTransaction: Send {
    /// Stage an insert.
    fn insert(&mut self, record: PhotoRecord);

    /// Stage a full-row update.
    fn update(&mut self, record: PhotoRecord);

    /// Stage a delete.
    fn delete(&mut self, id: PhotoId);

    /// Apply every staged mutation atomically.
    async fn commit(self: Box<Self>) -> Result<(), MetadataError>;

    /// Discard every staged mutation.
    fn rollback(self: Box<Self>);
}

/// Record-oriented store for photo rows.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new row.
    async fn insert(&self, record: PhotoRecord) -> Result<(), MetadataError>;

    /// Replace an existing row.
    async fn update(&self, record: PhotoRecord) -> Result<(), MetadataError>;

    /// Point lookup.
    async fn get(&self, id: PhotoId) -> Result<PhotoRecord, MetadataError>;

    /// Delete a row. Returns whether a row existed, so a second delete of
    /// the same id reports `Ok(false)` rather than an error.
    async fn delete(&self, id: PhotoId) -> Result<bool, MetadataError>;

    /// Rows for a client, newest upload first.
    async fn list_by_client(
        &self,
        client_id: &ClientId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PhotoRecord>, MetadataError>;

    /// Rows for a user, newest upload first.
    async fn list_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PhotoRecord>, MetadataError>;

    /// Case-insensitive substring search over `original_name` and MIME type.
    async fn search(&self, query: &str) -> Result<Vec<PhotoRecord>, MetadataError>;

    /// Count rows passing a filter.
    async fn count(&self, filter: &PhotoFilter) -> Result<u64, MetadataError>;

    /// First row for a client with the given content checksum, if any.
    /// Supports the optional checksum-dedup policy at ingress.
    async fn find_by_checksum(
        &self,
        client_id: &ClientId,
        checksum: &str,
    ) -> Result<Option<PhotoRecord>, MetadataError>;

    /// Open a buffered transaction.
    async fn begin(&self) -> Result<Box<dyn MetadataTransaction>, MetadataError>;

    /// Cheap liveness probe for readiness gating.
    async fn ping(&self) -> bool;
}
