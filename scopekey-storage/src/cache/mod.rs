//! Digest cache layer.
//!
//! Computing a scope digest costs one aggregate query. This module keeps the
//! result in a [`CacheStore`](scopekey_core::CacheStore) keyed by a hash of
//! the digest SQL, so the same scope costs nothing until its entry expires.
//!
//! # Staleness
//!
//! A cached key may lag behind row changes by up to `expires_in`. Reads
//! return [`DigestRead`], which carries when the digest was computed, so
//! callers that care can inspect it.
//!
//! # Example
//!
//! ```ignore
//! let cache = KeyCache::in_memory(KeyCacheConfig::from_env())?;
//! let read = cache.fetch_digest(&connection, &sql).await?;
//!
//! if read.staleness() > Duration::from_secs(300) {
//!     tracing::info!("digest is getting old");
//! }
//! ```

pub mod memory;
pub mod read;
pub mod read_through;
pub mod stats;

pub use memory::MemoryCacheStore;
pub use read::DigestRead;
pub use read_through::KeyCache;
pub use stats::CacheStats;
