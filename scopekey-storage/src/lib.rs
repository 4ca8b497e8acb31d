//! scopekey Storage - Cached Scope Keys
//!
//! Resolves scope digests through a read-through cache and composes them into
//! cache key strings. Database and cache store access go through the
//! collaborator traits defined in `scopekey-core`.

pub mod cache;
pub mod keys;

pub use cache::{CacheStats, DigestRead, KeyCache, MemoryCacheStore};
pub use keys::ScopeKeys;

// Re-export the core surface so callers need a single dependency
pub use scopekey_core::{
    build_digest_sql, CacheEntry, CacheStore, CacheStoreError, DatabaseConnection, Dialect,
    Fragment, KeyCacheConfig, RecordKey, Scope, ScopeKeyError, ScopeKeyResult, ScopeSpec,
};
