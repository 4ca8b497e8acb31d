//! Cache store collaborator and the entries it holds.

use crate::CacheStoreError;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cached digest value.
///
/// `value` is `None` when the digest query returned NULL (an empty scope);
/// such results are cached like any other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Option<String>,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an entry cached at `now` that expires after `expires_in`.
    pub fn new(value: Option<String>, now: DateTime<Utc>, expires_in: Duration) -> Self {
        Self {
            value,
            cached_at: now,
            expires_at: add_duration(now, expires_in),
        }
    }

    /// Whether the entry has passed its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether an expired entry is still inside the race window at `now`.
    ///
    /// While inside the window the first caller refreshes the value and
    /// everyone else may keep serving the stale one.
    pub fn in_race_window(&self, now: DateTime<Utc>, race_condition_ttl: Duration) -> bool {
        !race_condition_ttl.is_zero()
            && self.is_expired_at(now)
            && now < add_duration(self.expires_at, race_condition_ttl)
    }

    /// The same value with its expiry pushed to `now + by`.
    pub fn extended(&self, now: DateTime<Utc>, by: Duration) -> Self {
        Self {
            value: self.value.clone(),
            cached_at: self.cached_at,
            expires_at: add_duration(now, by),
        }
    }
}

fn add_duration(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// External key/value store the digest cache is kept in.
///
/// The store is shared and externally synchronised; callers never assume
/// exclusive access. `ttl` is the eviction horizon for the stored entry,
/// which may be longer than the entry's own `expires_at`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheStoreError>;

    async fn put(&self, key: &str, entry: CacheEntry, ttl: Duration) -> Result<(), CacheStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_expiry() {
        let now = Utc::now();
        let entry = CacheEntry::new(Some("abc".to_string()), now, Duration::from_secs(600));
        assert!(!entry.is_expired_at(now));
        assert!(!entry.is_expired_at(now + TimeDelta::seconds(599)));
        assert!(entry.is_expired_at(now + TimeDelta::seconds(600)));
    }

    #[test]
    fn test_race_window() {
        let now = Utc::now();
        let entry = CacheEntry::new(None, now, Duration::from_secs(60));
        let race = Duration::from_secs(10);

        assert!(!entry.in_race_window(now, race));
        assert!(entry.in_race_window(now + TimeDelta::seconds(65), race));
        assert!(!entry.in_race_window(now + TimeDelta::seconds(71), race));
        assert!(!entry.in_race_window(now + TimeDelta::seconds(65), Duration::ZERO));
    }

    #[test]
    fn test_extended_keeps_value_and_cached_at() {
        let now = Utc::now();
        let entry = CacheEntry::new(Some("abc".to_string()), now, Duration::from_secs(1));
        let later = now + TimeDelta::seconds(5);
        let extended = entry.extended(later, Duration::from_secs(10));

        assert_eq!(extended.value, entry.value);
        assert_eq!(extended.cached_at, now);
        assert!(!extended.is_expired_at(later));
    }

    #[test]
    fn test_huge_duration_saturates() {
        let now = Utc::now();
        let entry = CacheEntry::new(None, now, Duration::MAX);
        assert_eq!(entry.expires_at, DateTime::<Utc>::MAX_UTC);
    }
}
