//! Configuration types

use crate::{ConfigError, ScopeKeyResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Namespace tag prepended to every digest cache key.
pub const DEFAULT_NAMESPACE: &str = "scope_cache_key";

/// Configuration for the digest cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCacheConfig {
    /// How long a cached digest is served before it is recomputed.
    pub expires_in: Duration,
    /// How long after expiry concurrent callers keep receiving the stale
    /// digest while one caller recomputes it. Zero disables the window.
    pub race_condition_ttl: Duration,
    /// Namespace tag of the cache keys.
    pub namespace: String,
    /// Entry bound for the in-process store.
    pub max_capacity: u64,
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self {
            expires_in: Duration::from_secs(600), // 10 minutes
            race_condition_ttl: Duration::from_secs(10),
            namespace: DEFAULT_NAMESPACE.to_string(),
            max_capacity: 10_000,
        }
    }
}

impl KeyCacheConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            expires_in: std::env::var("SCOPEKEY_CACHE_EXPIRES_IN_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.expires_in),
            race_condition_ttl: std::env::var("SCOPEKEY_CACHE_RACE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.race_condition_ttl),
            namespace: std::env::var("SCOPEKEY_CACHE_NAMESPACE").unwrap_or(defaults.namespace),
            max_capacity: std::env::var("SCOPEKEY_CACHE_MAX_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_capacity),
        }
    }

    pub fn with_expires_in(mut self, duration: Duration) -> Self {
        self.expires_in = duration;
        self
    }

    pub fn with_race_condition_ttl(mut self, duration: Duration) -> Self {
        self.race_condition_ttl = duration;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_max_capacity(mut self, max: u64) -> Self {
        self.max_capacity = max;
        self
    }

    /// Eviction horizon for stored entries: expiry plus the race window.
    pub fn store_ttl(&self) -> Duration {
        self.expires_in.saturating_add(self.race_condition_ttl)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ScopeKeyResult<()> {
        if self.expires_in.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "expires_in".to_string(),
                value: format!("{:?}", self.expires_in),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }

        if self.namespace.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "namespace".to_string(),
                value: self.namespace.clone(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }

        if self.max_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_capacity".to_string(),
                value: self.max_capacity.to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScopeKeyError;

    #[test]
    fn test_defaults() {
        let config = KeyCacheConfig::default();
        assert_eq!(config.expires_in, Duration::from_secs(600));
        assert_eq!(config.race_condition_ttl, Duration::from_secs(10));
        assert_eq!(config.namespace, "scope_cache_key");
        assert_eq!(config.store_ttl(), Duration::from_secs(610));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = KeyCacheConfig::new()
            .with_expires_in(Duration::from_secs(60))
            .with_race_condition_ttl(Duration::ZERO)
            .with_namespace("fragments")
            .with_max_capacity(5);

        assert_eq!(config.expires_in, Duration::from_secs(60));
        assert_eq!(config.race_condition_ttl, Duration::ZERO);
        assert_eq!(config.namespace, "fragments");
        assert_eq!(config.max_capacity, 5);
    }

    #[test]
    fn test_validate_rejects_zero_expiry() {
        let config = KeyCacheConfig::new().with_expires_in(Duration::ZERO);
        match config.validate() {
            Err(ScopeKeyError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "expires_in");
            }
            other => panic!("expected invalid expires_in, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_blank_namespace() {
        let config = KeyCacheConfig::new().with_namespace(" ");
        assert!(matches!(
            config.validate(),
            Err(ScopeKeyError::Config(ConfigError::InvalidValue { ref field, .. })) if field == "namespace"
        ));
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = KeyCacheConfig::new()
            .with_namespace("views_digest")
            .with_expires_in(Duration::from_secs(30));
        let json = serde_json::to_string(&config).unwrap();
        let restored: KeyCacheConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
    }
}
