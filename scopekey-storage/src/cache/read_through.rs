//! Read-through digest cache.
//!
//! Digest queries are cached under their SQL text so repeated key lookups
//! within the expiry window cost no database round-trip. Expired entries get
//! a short race window during which one caller recomputes while concurrent
//! callers keep serving the previous digest.
//!
//! Concurrent misses on the same key share one computation: the first caller
//! runs the query while the rest wait on a per-key lock and then read the
//! stored result.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use scopekey_core::{
    CacheEntry, CacheStore, CacheStoreError, DatabaseConnection, KeyCacheConfig, ScopeKeyResult,
};
use sha2::{Digest, Sha256};

use super::memory::MemoryCacheStore;
use super::read::DigestRead;
use super::stats::{CacheStats, StatsCounters};

/// Per-key locks held while a digest is being computed.
type InFlight = DashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Read-through cache in front of digest queries.
///
/// Without a store every lookup goes straight to the database. Store failures
/// never fail a lookup: they are logged, counted and treated as misses.
///
/// # Example
///
/// ```ignore
/// let cache = KeyCache::in_memory(KeyCacheConfig::default())?;
/// let read = cache.fetch_digest(&connection, &sql).await?;
/// if read.was_cache_hit() {
///     // no database round-trip
/// }
/// ```
#[derive(Clone)]
pub struct KeyCache {
    store: Option<Arc<dyn CacheStore>>,
    config: KeyCacheConfig,
    stats: Arc<StatsCounters>,
    in_flight: Arc<InFlight>,
}

impl KeyCache {
    /// Create a cache over an external store.
    pub fn new(store: Arc<dyn CacheStore>, config: KeyCacheConfig) -> ScopeKeyResult<Self> {
        config.validate()?;
        Ok(Self {
            store: Some(store),
            config,
            stats: Arc::new(StatsCounters::default()),
            in_flight: Arc::new(DashMap::new()),
        })
    }

    /// Create a cache over an external store with default configuration.
    pub fn with_defaults(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store: Some(store),
            config: KeyCacheConfig::default(),
            stats: Arc::new(StatsCounters::default()),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Create a cache over a process-local [`MemoryCacheStore`].
    pub fn in_memory(config: KeyCacheConfig) -> ScopeKeyResult<Self> {
        let store = Arc::new(MemoryCacheStore::from_config(&config));
        Self::new(store, config)
    }

    /// A cache with no store: every lookup runs the digest query.
    pub fn uncached() -> Self {
        Self {
            store: None,
            config: KeyCacheConfig::default(),
            stats: Arc::new(StatsCounters::default()),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &KeyCacheConfig {
        &self.config
    }

    /// Whether lookups bypass the store entirely.
    pub fn is_pass_through(&self) -> bool {
        self.store.is_none()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Store key for a digest query: `{namespace}/{sha256(sql)}`.
    pub fn cache_key_for(&self, sql: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(sql.as_bytes());
        format!("{}/{}", self.config.namespace, hex::encode(hasher.finalize()))
    }

    /// Return the digest produced by `sql`, from the store when fresh.
    ///
    /// Costs one database round-trip on a miss and none on a hit. Concurrent
    /// misses for the same query wait for a single round-trip. Query failures
    /// propagate unchanged.
    pub async fn fetch_digest(
        &self,
        connection: &dyn DatabaseConnection,
        sql: &str,
    ) -> ScopeKeyResult<DigestRead> {
        let Some(store) = self.store.as_ref() else {
            StatsCounters::bump(&self.stats.pass_through);
            tracing::debug!("No digest cache store configured, querying directly");
            let value = connection.select_value(sql).await?;
            return Ok(DigestRead::from_database(value));
        };

        let key = self.cache_key_for(sql);

        if let Ok(Some(entry)) = store.get(&key).await {
            if !entry.is_expired_at(Utc::now()) {
                return Ok(self.hit(&key, entry));
            }
        }

        let lock = self.in_flight.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.compute_once(connection, store.as_ref(), &key, sql).await
        };
        // Drop the lock once nobody else holds or waits on it.
        self.in_flight.remove_if(&key, |_, held| Arc::strong_count(held) <= 2);

        result
    }

    /// Runs with the key's lock held; an earlier holder may already have
    /// stored a fresh digest.
    async fn compute_once(
        &self,
        connection: &dyn DatabaseConnection,
        store: &dyn CacheStore,
        key: &str,
        sql: &str,
    ) -> ScopeKeyResult<DigestRead> {
        let now = Utc::now();

        match store.get(key).await {
            Ok(Some(entry)) if !entry.is_expired_at(now) => {
                return Ok(self.hit(key, entry));
            }
            Ok(Some(entry)) if entry.in_race_window(now, self.config.race_condition_ttl) => {
                // Keep serving the old digest to concurrent callers while this
                // one recomputes.
                StatsCounters::bump(&self.stats.race_refreshes);
                let rearmed = entry.extended(now, self.config.race_condition_ttl);
                if let Err(e) = store.put(key, rearmed, self.config.store_ttl()).await {
                    self.record_store_error(&e);
                }
            }
            Ok(_) => {}
            Err(e) => self.record_store_error(&e),
        }

        StatsCounters::bump(&self.stats.misses);
        tracing::debug!(cache_key = %key, "Digest cache miss");
        tracing::trace!(sql = %sql, "Running digest query");

        let value = connection.select_value(sql).await?;

        let entry = CacheEntry::new(value.clone(), Utc::now(), self.config.expires_in);
        if let Err(e) = store.put(key, entry, self.config.store_ttl()).await {
            self.record_store_error(&e);
        }

        Ok(DigestRead::from_database(value))
    }

    fn hit(&self, key: &str, entry: CacheEntry) -> DigestRead {
        StatsCounters::bump(&self.stats.hits);
        tracing::debug!(cache_key = %key, "Digest cache hit");
        DigestRead::from_cache(entry.value, entry.cached_at)
    }

    fn record_store_error(&self, error: &CacheStoreError) {
        StatsCounters::bump(&self.stats.store_errors);
        tracing::warn!(error = %error, "Digest cache store failed, treating as miss");
    }
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache")
            .field("pass_through", &self.is_pass_through())
            .field("config", &self.config)
            .finish()
    }
}
