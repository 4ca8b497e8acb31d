//! Scope cache keys.
//!
//! [`ScopeKeys`] ties a database connection to a [`KeyCache`] and turns
//! scopes and fragment lists into key strings.

use std::sync::Arc;

use scopekey_core::{
    join_fragments, scope_key, DatabaseConnection, Dialect, Fragment, Scope, ScopeKeyResult,
    FRAGMENT_KEY_PREFIX,
};

use crate::cache::{DigestRead, KeyCache};

/// Computes cache keys for scopes on one connection.
///
/// The dialect is resolved once from the connection's adapter name, so an
/// unsupported database fails at construction rather than on first use.
///
/// # Example
///
/// ```ignore
/// let keys = ScopeKeys::new(connection, KeyCache::in_memory(config)?)?;
/// let comments = ScopeSpec::new("comments").filter("post_id = 42");
///
/// // "comments/0b27dac757428d88c0f3a0298eb0278f" or "comments/empty"
/// let key = keys.cache_key(&comments).await?;
///
/// // "v1/comments/0b27dac757428d88c0f3a0298eb0278f/users/empty"
/// let composite = keys
///     .compose(&[Fragment::from("v1"), Fragment::scope(&comments), Fragment::scope(&users)])
///     .await?;
/// ```
#[derive(Clone)]
pub struct ScopeKeys {
    connection: Arc<dyn DatabaseConnection>,
    cache: KeyCache,
    dialect: Dialect,
}

impl ScopeKeys {
    pub fn new(connection: Arc<dyn DatabaseConnection>, cache: KeyCache) -> ScopeKeyResult<Self> {
        let dialect = connection.dialect()?;
        Ok(Self {
            connection,
            cache,
            dialect,
        })
    }

    /// Keys computed with a fresh query on every call.
    pub fn uncached(connection: Arc<dyn DatabaseConnection>) -> ScopeKeyResult<Self> {
        Self::new(connection, KeyCache::uncached())
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn cache(&self) -> &KeyCache {
        &self.cache
    }

    /// The aggregate query whose result identifies the scope's rows.
    pub fn digest_sql(&self, scope: &dyn Scope) -> ScopeKeyResult<String> {
        self.dialect.build_digest_sql(scope)
    }

    /// Resolve the digest of a scope through the cache.
    pub async fn digest(&self, scope: &dyn Scope) -> ScopeKeyResult<DigestRead> {
        let sql = self.digest_sql(scope)?;
        self.cache.fetch_digest(self.connection.as_ref(), &sql).await
    }

    /// Cache key of a single scope: `{model_key}/{digest}` or
    /// `{model_key}/empty` when no rows match.
    pub async fn cache_key(&self, scope: &dyn Scope) -> ScopeKeyResult<String> {
        let read = self.digest(scope).await?;
        let key = scope_key(scope.model_key(), read.value());
        tracing::debug!(
            model = %scope.model_key(),
            cache_hit = read.was_cache_hit(),
            key = %key,
            "Computed scope cache key"
        );
        Ok(key)
    }

    /// Join fragments into one key, resolving scopes to their cache keys.
    ///
    /// Fragments are resolved in order. Each scope costs at most one round-trip.
    pub async fn compose(&self, fragments: &[Fragment<'_>]) -> ScopeKeyResult<String> {
        let mut parts = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let part = match fragment {
                Fragment::Literal(value) => value.to_string(),
                Fragment::Scope(scope) => self.cache_key(*scope).await?,
                Fragment::Record(record) => record.cache_key(),
            };
            parts.push(part);
        }
        Ok(join_fragments(parts))
    }

    /// Composite key for a cached view fragment, under the `views/` prefix.
    pub async fn fragment_key(&self, fragments: &[Fragment<'_>]) -> ScopeKeyResult<String> {
        let composed = self.compose(fragments).await?;
        if composed.is_empty() {
            return Ok(FRAGMENT_KEY_PREFIX.to_string());
        }
        Ok(join_fragments([FRAGMENT_KEY_PREFIX, composed.as_str()]))
    }
}

impl std::fmt::Debug for ScopeKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeKeys")
            .field("adapter", &self.connection.adapter_name())
            .field("dialect", &self.dialect)
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use scopekey_core::{DialectError, RecordKey, ScopeKeyError, ScopeSpec};

    struct FixedConnection {
        adapter: &'static str,
        digest: Option<&'static str>,
    }

    #[async_trait]
    impl DatabaseConnection for FixedConnection {
        fn adapter_name(&self) -> &str {
            self.adapter
        }

        async fn select_value(&self, _sql: &str) -> ScopeKeyResult<Option<String>> {
            Ok(self.digest.map(str::to_string))
        }
    }

    fn keys(digest: Option<&'static str>) -> ScopeKeys {
        let conn = Arc::new(FixedConnection {
            adapter: "PostgreSQL",
            digest,
        });
        ScopeKeys::uncached(conn).unwrap()
    }

    #[tokio::test]
    async fn test_cache_key_with_digest() {
        let keys = keys(Some("0b27dac757428d88c0f3a0298eb0278f"));
        let key = keys.cache_key(&ScopeSpec::new("comments")).await.unwrap();
        assert_eq!(key, "comments/0b27dac757428d88c0f3a0298eb0278f");
    }

    #[tokio::test]
    async fn test_cache_key_uses_model_key() {
        let keys = keys(None);
        let scope = ScopeSpec::new("blog_comments").with_model_key("comments");
        assert_eq!(keys.cache_key(&scope).await.unwrap(), "comments/empty");
    }

    #[tokio::test]
    async fn test_compose_mixes_fragment_kinds() {
        let keys = keys(None);
        let comments = ScopeSpec::new("comments");
        let updated = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

        let key = keys
            .compose(&[
                Fragment::from("v1"),
                Fragment::scope(&comments),
                RecordKey::new("posts", 7, updated).into(),
            ])
            .await
            .unwrap();

        assert_eq!(key, "v1/comments/empty/posts/7-20240102030405000000000");
    }

    #[tokio::test]
    async fn test_compose_empty_list() {
        assert_eq!(keys(None).compose(&[]).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_fragment_key_prefix() {
        let keys = keys(None);
        let comments = ScopeSpec::new("comments");
        let key = keys
            .fragment_key(&["v1".into(), Fragment::scope(&comments)])
            .await
            .unwrap();
        assert_eq!(key, "views/v1/comments/empty");
        assert_eq!(keys.fragment_key(&[]).await.unwrap(), "views");
    }

    #[tokio::test]
    async fn test_invalid_scope_fails_before_query() {
        let keys = keys(Some("abc"));
        let err = keys
            .cache_key(&ScopeSpec::new("comments; DROP TABLE users"))
            .await
            .unwrap_err();
        assert!(matches!(err, ScopeKeyError::Validation(_)));
    }

    #[test]
    fn test_unsupported_adapter_rejected() {
        let conn = Arc::new(FixedConnection {
            adapter: "SQLite",
            digest: None,
        });
        let err = ScopeKeys::uncached(conn).unwrap_err();
        assert!(matches!(
            err,
            ScopeKeyError::Dialect(DialectError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_dialect_resolved_from_adapter() {
        let conn = Arc::new(FixedConnection {
            adapter: "Mysql2",
            digest: None,
        });
        let keys = ScopeKeys::uncached(conn).unwrap();
        assert_eq!(keys.dialect(), Dialect::ConcatAggregate);
    }
}
