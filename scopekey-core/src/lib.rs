//! scopekey Core - Scope Types and Digest SQL
//!
//! Pure building blocks shared by the other crates: scope descriptions, the
//! per-dialect digest query strategies, key fragments and composition, and
//! the collaborator traits for databases and cache stores.
//! This crate performs no I/O.

pub mod cache;
pub mod config;
pub mod connection;
pub mod dialect;
pub mod digest;
pub mod error;
pub mod key;
pub mod scope;

pub use cache::{CacheEntry, CacheStore};
pub use config::{KeyCacheConfig, DEFAULT_NAMESPACE};
pub use connection::DatabaseConnection;
pub use dialect::{
    build_digest_sql, ArrayAggregateDialect, ConcatAggregateDialect, Dialect, DigestStrategy,
};
pub use digest::{array_digest, concat_digest, md5_hex, RowStamp};
pub use error::{
    CacheStoreError, ConfigError, DialectError, QueryError, ScopeKeyError, ScopeKeyResult,
    ValidationError,
};
pub use key::{
    join_fragments, scope_key, Fragment, RecordKey, EMPTY_DIGEST, FRAGMENT_KEY_PREFIX,
    KEY_SEPARATOR,
};
pub use scope::{
    validate_scope, JoinClause, JoinKind, OrderBy, Page, Scope, ScopeSpec, SortDirection,
    DEFAULT_PRIMARY_KEY, DEFAULT_UPDATED_AT,
};
