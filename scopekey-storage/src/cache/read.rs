//! Digest reads carrying cache metadata.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Result of a digest lookup.
///
/// Carries the digest together with when it was computed and whether it came
/// from the store, so callers can reason about staleness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestRead {
    /// The digest, `None` when the scope matched no rows.
    value: Option<String>,
    /// When the digest was computed.
    cached_at: DateTime<Utc>,
    was_cache_hit: bool,
}

impl DigestRead {
    /// A digest served from the store.
    pub fn from_cache(value: Option<String>, cached_at: DateTime<Utc>) -> Self {
        Self {
            value,
            cached_at,
            was_cache_hit: true,
        }
    }

    /// A digest just computed by the database.
    pub fn from_database(value: Option<String>) -> Self {
        Self {
            value,
            cached_at: Utc::now(),
            was_cache_hit: false,
        }
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn into_value(self) -> Option<String> {
        self.value
    }

    /// Whether the scope matched no rows.
    pub fn is_empty(&self) -> bool {
        self.value.as_deref().map_or(true, |v| v.trim().is_empty())
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    /// Time since the digest was computed.
    pub fn staleness(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }
}
