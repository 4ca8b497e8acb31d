//! In-process cache store backed by moka.

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use scopekey_core::{CacheEntry, CacheStore, CacheStoreError, KeyCacheConfig};
use std::time::{Duration, Instant};

/// Longest eviction horizon handed to moka.
const MAX_ENTRY_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct StoredEntry {
    entry: CacheEntry,
    ttl: Duration,
}

/// Evicts each entry after the ttl it was written with.
struct EntryTtl;

impl Expiry<String, StoredEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// A bounded, process-local [`CacheStore`].
///
/// Suitable when a single process computes keys; a shared store is needed for
/// several processes to agree on cached digests.
#[derive(Clone)]
pub struct MemoryCacheStore {
    entries: Cache<String, StoredEntry>,
}

impl MemoryCacheStore {
    /// Create a store holding at most `max_capacity` entries.
    pub fn new(max_capacity: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(EntryTtl)
                .build(),
        }
    }

    pub fn from_config(config: &KeyCacheConfig) -> Self {
        Self::new(config.max_capacity)
    }

    /// Approximate number of live entries.
    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::from_config(&KeyCacheConfig::default())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheStoreError> {
        Ok(self.entries.get(key).await.map(|stored| stored.entry))
    }

    async fn put(&self, key: &str, entry: CacheEntry, ttl: Duration) -> Result<(), CacheStoreError> {
        let stored = StoredEntry {
            entry,
            ttl: ttl.min(MAX_ENTRY_TTL),
        };
        self.entries.insert(key.to_string(), stored).await;
        Ok(())
    }
}
