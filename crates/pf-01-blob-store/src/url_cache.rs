//! # Presigned URL Cache
//!
//! Generating presigned URLs costs a round trip against real object stores,
//! and clients re-request the same photo constantly while it renders.
//! Entries live in a bounded LRU with a TTL shorter than the URL expiry and
//! are invalidated explicitly when the owning photo is updated or deleted.

use crate::contract::UrlMethod;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default cache capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Default entry TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    method: &'static str,
    bucket: String,
    key: String,
}

struct CachedUrl {
    url: String,
    inserted_at: Instant,
}

/// Bounded LRU + TTL cache for presigned URLs.
pub struct PresignedUrlCache {
    entries: Mutex<LruCache<CacheKey, CachedUrl>>,
    ttl: Duration,
}

impl PresignedUrlCache {
    /// Create a cache with default capacity and TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    /// Create a cache with explicit capacity and TTL.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_config(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).expect("capacity must be nonzero"),
            )),
            ttl,
        }
    }

    /// Look up a cached URL, expiring stale entries on the way.
    #[must_use]
    pub fn get(&self, method: UrlMethod, bucket: &str, key: &str) -> Option<String> {
        let cache_key = CacheKey {
            method: method.as_str(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&cache_key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.url.clone()),
            Some(_) => {
                entries.pop(&cache_key);
                None
            }
            None => None,
        }
    }

    /// Insert a freshly generated URL.
    pub fn insert(&self, method: UrlMethod, bucket: &str, key: &str, url: String) {
        let cache_key = CacheKey {
            method: method.as_str(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.put(
            cache_key,
            CachedUrl {
                url,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every entry whose key starts with `key_prefix` in `bucket`.
    /// Called by the owning coordinator when a photo is updated or deleted.
    pub fn invalidate_prefix(&self, bucket: &str, key_prefix: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let stale: Vec<CacheKey> = entries
            .iter()
            .filter(|(k, _)| k.bucket == bucket && k.key.starts_with(key_prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            entries.pop(&key);
        }
    }

    /// Current entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PresignedUrlCache {
    fn default() -> Self {
        Self::new()
    }
}
