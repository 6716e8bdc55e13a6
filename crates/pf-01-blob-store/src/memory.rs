//! # In-Memory Blob Store
//!
//! Reference implementation of the [`BlobStore`] contract for single-node
//! runs and tests. Fault-injection knobs simulate transport loss and
//! transient per-operation failures so recovery paths can be exercised
//! without a real object store.

use crate::contract::{
    validate_key, BlobError, BlobStore, ObjectMeta, PutOptions, PutResult, UrlMethod,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

struct StoredObject {
    bytes: Bytes,
    etag: String,
    content_type: Option<String>,
    metadata: BTreeMap<String, String>,
    last_modified: DateTime<Utc>,
}

/// In-memory blob store with fault injection.
pub struct InMemoryBlobStore {
    /// Objects keyed by (bucket, key).
    objects: RwLock<HashMap<(String, String), StoredObject>>,
    /// Base endpoint rendered into presigned URLs.
    endpoint: String,
    /// Simulated transport link.
    connected: AtomicBool,
    /// Remaining `get` calls to fail with `Unavailable`.
    failing_gets: AtomicU32,
    /// Remaining `put` calls to fail with `Unavailable`.
    failing_puts: AtomicU32,
}

impl InMemoryBlobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            endpoint: endpoint.into(),
            connected: AtomicBool::new(true),
            failing_gets: AtomicU32::new(0),
            failing_puts: AtomicU32::new(0),
        }
    }

    /// Flip the simulated transport link.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Fail the next `count` get operations with `Unavailable`.
    pub fn fail_next_gets(&self, count: u32) {
        self.failing_gets.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` put operations with `Unavailable`.
    pub fn fail_next_puts(&self, count: u32) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    /// Number of stored objects across all buckets.
    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    fn check_connected(&self) -> Result<(), BlobError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BlobError::Unavailable("transport disconnected".into()))
        }
    }

    fn consume_injected_failure(counter: &AtomicU32, op: &str) -> Result<(), BlobError> {
        let prev =
            counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if prev.is_ok() {
            return Err(BlobError::Unavailable(format!("injected {op} failure")));
        }
        Ok(())
    }

    fn etag_of(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        options: PutOptions,
    ) -> Result<PutResult, BlobError> {
        self.check_connected()?;
        Self::consume_injected_failure(&self.failing_puts, "put")?;
        validate_key(key)?;

        let etag = Self::etag_of(&bytes);
        let size = bytes.len() as u64;
        let mut objects = self.objects.write().await;
        let slot = (bucket.to_string(), key.to_string());

        if let Some(existing) = objects.get(&slot) {
            if existing.etag == etag {
                // Identical bytes at an identical key: checksum-verified no-op.
                debug!(bucket, key, "put skipped, object unchanged");
                return Ok(PutResult { etag, size });
            }
        }

        objects.insert(
            slot,
            StoredObject {
                bytes,
                etag: etag.clone(),
                content_type: options.content_type,
                metadata: options.metadata,
                last_modified: Utc::now(),
            },
        );
        debug!(bucket, key, size, "object stored");
        Ok(PutResult { etag, size })
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, BlobError> {
        self.check_connected()?;
        Self::consume_injected_failure(&self.failing_gets, "get")?;

        let objects = self.objects.read().await;
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| object.bytes.clone())
            .ok_or_else(|| BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectMeta, BlobError> {
        self.check_connected()?;

        let objects = self.objects.read().await;
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| ObjectMeta {
                bucket: bucket.to_string(),
                key: key.to_string(),
                size: object.bytes.len() as u64,
                etag: object.etag.clone(),
                last_modified: object.last_modified,
                content_type: object.content_type.clone(),
                metadata: object.metadata.clone(),
            })
            .ok_or_else(|| BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<(), BlobError> {
        self.check_connected()?;

        let mut objects = self.objects.write().await;
        // Removing an absent key is a success.
        objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn presigned_url(
        &self,
        method: UrlMethod,
        bucket: &str,
        key: &str,
        expires_secs: u64,
    ) -> Result<String, BlobError> {
        self.check_connected()?;
        validate_key(key)?;

        let expires_at = Utc::now().timestamp() as u64 + expires_secs;
        let signature = hex::encode(Sha256::digest(format!(
            "{}|{bucket}|{key}|{expires_at}",
            method.as_str()
        )));
        Ok(format!(
            "{}/{bucket}/{key}?expires={expires_at}&signature={signature}",
            self.endpoint
        ))
    }

    async fn list(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<ObjectMeta>, BlobError> {
        self.check_connected()?;

        let objects = self.objects.read().await;
        let mut entries: Vec<ObjectMeta> = objects
            .iter()
            .filter(|((b, k), _)| b == bucket && prefix.map_or(true, |p| k.starts_with(p)))
            .map(|((b, k), object)| ObjectMeta {
                bucket: b.clone(),
                key: k.clone(),
                size: object.bytes.len() as u64,
                etag: object.etag.clone(),
                last_modified: object.last_modified,
                content_type: object.content_type.clone(),
                metadata: object.metadata.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn ping(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryBlobStore {
        InMemoryBlobStore::new("http://blob.local:9000")
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let store = store();
        let result = store
            .put("photos", "a/b.png", Bytes::from_static(b"png-bytes"), PutOptions::default())
            .await
            .expect("put");
        assert_eq!(result.size, 9);

        let bytes = store.get("photos", "a/b.png").await.expect("get");
        assert_eq!(&bytes[..], b"png-bytes");
    }

    #[tokio::test]
    async fn test_put_identical_bytes_is_noop() {
        let store = store();
        let first = store
            .put("photos", "k", Bytes::from_static(b"same"), PutOptions::default())
            .await
            .expect("put");
        let second = store
            .put("photos", "k", Bytes::from_static(b"same"), PutOptions::default())
            .await
            .expect("put again");
        assert_eq!(first.etag, second.etag);
        assert_eq!(store.object_count().await, 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = store();
        let err = store.get("photos", "nope").await.expect_err("missing");
        assert!(matches!(err, BlobError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_remove_absent_is_success() {
        let store = store();
        store.remove("photos", "ghost").await.expect("idempotent");
    }

    #[tokio::test]
    async fn test_injected_get_failures_then_recovery() {
        let store = store();
        store
            .put("photos", "k", Bytes::from_static(b"x"), PutOptions::default())
            .await
            .expect("put");

        store.fail_next_gets(2);
        assert!(store.get("photos", "k").await.is_err());
        assert!(store.get("photos", "k").await.is_err());
        assert!(store.get("photos", "k").await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnected_store_is_unavailable() {
        let store = store();
        store.set_connected(false);
        let err = store
            .put("photos", "k", Bytes::from_static(b"x"), PutOptions::default())
            .await
            .expect_err("unavailable");
        assert!(err.is_retryable());
        assert!(!store.ping().await);
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix() {
        let store = store();
        for key in ["artifacts/p1/thumb", "artifacts/p1/opt", "artifacts/p2/thumb"] {
            store
                .put("photos", key, Bytes::from_static(b"x"), PutOptions::default())
                .await
                .expect("put");
        }

        let listed = store
            .list("photos", Some("artifacts/p1/"))
            .await
            .expect("list");
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|m| m.key.starts_with("artifacts/p1/")));
    }

    #[tokio::test]
    async fn test_presigned_url_shape() {
        let store = store();
        let url = store
            .presigned_url(UrlMethod::Get, "photos", "a/b.png", 900)
            .await
            .expect("url");
        assert!(url.starts_with("http://blob.local:9000/photos/a/b.png?expires="));
        assert!(url.contains("signature="));
    }
}
