//! # In-Memory Metadata Store
//!
//! Reference implementation of the [`MetadataStore`] contract with the
//! secondary indexes the contract's ordered queries need:
//!
//! - `rows`: O(1) lookup by photo id
//! - `by_client`: upload-time-ordered ids per client
//! - `by_user`: upload-time-ordered ids per user
//!
//! Transactions clone the state, apply staged mutations with validation,
//! and swap on success, so a failing mutation applies nothing.

use crate::contract::{
    MetadataError, MetadataStore, MetadataTransaction, PhotoFilter,
};
use async_trait::async_trait;
use shared_types::{ClientId, PhotoId, PhotoRecord, UserId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Index key ordering ids by upload time (millis), photo id as tie-break.
type UploadKey = (i64, PhotoId);

#[derive(Default, Clone)]
struct Inner {
    rows: HashMap<PhotoId, PhotoRecord>,
    by_client: BTreeMap<ClientId, BTreeSet<UploadKey>>,
    by_user: BTreeMap<UserId, BTreeSet<UploadKey>>,
}

impl Inner {
    fn upload_key(record: &PhotoRecord) -> UploadKey {
        (record.uploaded_at.timestamp_millis(), record.id)
    }

    fn index(&mut self, record: &PhotoRecord) {
        let key = Self::upload_key(record);
        self.by_client
            .entry(record.client_id.clone())
            .or_default()
            .insert(key);
        if let Some(user_id) = &record.user_id {
            self.by_user.entry(user_id.clone()).or_default().insert(key);
        }
    }

    fn unindex(&mut self, record: &PhotoRecord) {
        let key = Self::upload_key(record);
        if let Some(set) = self.by_client.get_mut(&record.client_id) {
            set.remove(&key);
            if set.is_empty() {
                self.by_client.remove(&record.client_id);
            }
        }
        if let Some(user_id) = &record.user_id {
            if let Some(set) = self.by_user.get_mut(user_id) {
                set.remove(&key);
                if set.is_empty() {
                    self.by_user.remove(user_id);
                }
            }
        }
    }

    fn apply_insert(&mut self, record: PhotoRecord) -> Result<(), MetadataError> {
        if self.rows.contains_key(&record.id) {
            return Err(MetadataError::AlreadyExists(record.id));
        }
        self.index(&record);
        self.rows.insert(record.id, record);
        Ok(())
    }

    fn apply_update(&mut self, record: PhotoRecord) -> Result<(), MetadataError> {
        let Some(existing) = self.rows.get(&record.id) else {
            return Err(MetadataError::NotFound(record.id));
        };
        // Identity columns are immutable, but reindex defensively in case a
        // caller rewrote one anyway.
        let existing = existing.clone();
        self.unindex(&existing);
        self.index(&record);
        self.rows.insert(record.id, record);
        Ok(())
    }

    fn apply_delete(&mut self, id: PhotoId) -> bool {
        match self.rows.remove(&id) {
            Some(record) => {
                self.unindex(&record);
                true
            }
            None => false,
        }
    }

    fn collect_ordered(
        &self,
        keys: Option<&BTreeSet<UploadKey>>,
        limit: usize,
        offset: usize,
    ) -> Vec<PhotoRecord> {
        keys.map(|set| {
            set.iter()
                .rev()
                .skip(offset)
                .take(limit)
                .filter_map(|(_, id)| self.rows.get(id).cloned())
                .collect()
        })
        .unwrap_or_default()
    }
}

/// In-memory metadata store with fault injection.
pub struct InMemoryMetadataStore {
    inner: Arc<RwLock<Inner>>,
    connected: AtomicBool,
    failing_writes: AtomicU32,
}

impl InMemoryMetadataStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            connected: AtomicBool::new(true),
            failing_writes: AtomicU32::new(0),
        }
    }

    /// Flip the simulated connection.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Fail the next `count` write operations with `Unavailable`.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn check_connected(&self) -> Result<(), MetadataError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MetadataError::Unavailable("connection lost".into()))
        }
    }

    fn consume_injected_write_failure(&self) -> Result<(), MetadataError> {
        let prev = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if prev.is_ok() {
            return Err(MetadataError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn insert(&self, record: PhotoRecord) -> Result<(), MetadataError> {
        self.check_connected()?;
        self.consume_injected_write_failure()?;
        let id = record.id;
        self.inner.write().await.apply_insert(record)?;
        debug!(photo_id = %id, "photo record inserted");
        Ok(())
    }

    async fn update(&self, record: PhotoRecord) -> Result<(), MetadataError> {
        self.check_connected()?;
        self.consume_injected_write_failure()?;
        self.inner.write().await.apply_update(record)
    }

    async fn get(&self, id: PhotoId) -> Result<PhotoRecord, MetadataError> {
        self.check_connected()?;
        self.inner
            .read()
            .await
            .rows
            .get(&id)
            .cloned()
            .ok_or(MetadataError::NotFound(id))
    }

    async fn delete(&self, id: PhotoId) -> Result<bool, MetadataError> {
        self.check_connected()?;
        self.consume_injected_write_failure()?;
        Ok(self.inner.write().await.apply_delete(id))
    }

    async fn list_by_client(
        &self,
        client_id: &ClientId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PhotoRecord>, MetadataError> {
        self.check_connected()?;
        let inner = self.inner.read().await;
        Ok(inner.collect_ordered(inner.by_client.get(client_id), limit, offset))
    }

    async fn list_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PhotoRecord>, MetadataError> {
        self.check_connected()?;
        let inner = self.inner.read().await;
        Ok(inner.collect_ordered(inner.by_user.get(user_id), limit, offset))
    }

    async fn search(&self, query: &str) -> Result<Vec<PhotoRecord>, MetadataError> {
        self.check_connected()?;
        let needle = query.to_ascii_lowercase();
        let inner = self.inner.read().await;
        let mut hits: Vec<PhotoRecord> = inner
            .rows
            .values()
            .filter(|record| {
                record.original_name.to_ascii_lowercase().contains(&needle)
                    || record.mime_type.as_mime().contains(&needle)
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(hits)
    }

    async fn count(&self, filter: &PhotoFilter) -> Result<u64, MetadataError> {
        self.check_connected()?;
        let inner = self.inner.read().await;
        Ok(inner.rows.values().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn find_by_checksum(
        &self,
        client_id: &ClientId,
        checksum: &str,
    ) -> Result<Option<PhotoRecord>, MetadataError> {
        self.check_connected()?;
        let inner = self.inner.read().await;
        Ok(inner
            .rows
            .values()
            .filter(|r| &r.client_id == client_id && r.checksum == checksum)
            .min_by_key(|r| r.uploaded_at)
            .cloned())
    }

    async fn begin(&self) -> Result<Box<dyn MetadataTransaction>, MetadataError> {
        self.check_connected()?;
        Ok(Box::new(MemoryTransaction {
            inner: self.inner.clone(),
            ops: Vec::new(),
        }))
    }

    async fn ping(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

enum TxOp {
    Insert(PhotoRecord),
    Update(PhotoRecord),
    Delete(PhotoId),
}

/// Buffered transaction over the in-memory store.
struct MemoryTransaction {
    inner: Arc<RwLock<Inner>>,
    ops: Vec<TxOp>,
}

#[async_trait]
impl MetadataTransaction for MemoryTransaction {
    fn insert(&mut self, record: PhotoRecord) {
        self.ops.push(TxOp::Insert(record));
    }

    fn update(&mut self, record: PhotoRecord) {
        self.ops.push(TxOp::Update(record));
    }

    fn delete(&mut self, id: PhotoId) {
        self.ops.push(TxOp::Delete(id));
    }

    async fn commit(self: Box<Self>) -> Result<(), MetadataError> {
        let mut guard = self.inner.write().await;
        // Validate against a scratch copy so a failing op applies nothing.
        let mut scratch = guard.clone();
        for op in &self.ops {
            match op {
                TxOp::Insert(record) => scratch.apply_insert(record.clone())?,
                TxOp::Update(record) => scratch.apply_update(record.clone())?,
                TxOp::Delete(id) => {
                    scratch.apply_delete(*id);
                }
            }
        }
        *guard = scratch;
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        // Staged ops are simply dropped.
    }
}
