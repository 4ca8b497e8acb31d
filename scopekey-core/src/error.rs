//! Error types for scope cache key operations

use thiserror::Error;

/// Database dialect errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DialectError {
    #[error("Unsupported database adapter: {adapter}")]
    Unsupported { adapter: String },
}

/// Errors raised while executing a digest query.
///
/// These are propagated to the caller unchanged. Retrying is the business of
/// the database client, not of the key computation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Digest query failed: {reason}")]
    ExecutionFailed { reason: String },

    #[error("Database connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Unexpected digest query result: {reason}")]
    UnexpectedResult { reason: String },
}

/// External cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheStoreError {
    #[error("Cache read failed for {key}: {reason}")]
    ReadFailed { key: String, reason: String },

    #[error("Cache write failed for {key}: {reason}")]
    WriteFailed { key: String, reason: String },
}

/// Scope validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid identifier for {field}: {value:?}")]
    InvalidIdentifier { field: String, value: String },

    #[error("Filter predicate must not be blank")]
    EmptyPredicate,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for scope key computation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScopeKeyError {
    #[error("Dialect error: {0}")]
    Dialect(#[from] DialectError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Cache store error: {0}")]
    CacheStore(#[from] CacheStoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for scope key operations.
pub type ScopeKeyResult<T> = Result<T, ScopeKeyError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_error_display_unsupported() {
        let err = DialectError::Unsupported {
            adapter: "SQLite".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Unsupported database adapter"));
        assert!(msg.contains("SQLite"));
    }

    #[test]
    fn test_cache_store_error_display_read_failed() {
        let err = CacheStoreError::ReadFailed {
            key: "scope_cache_key/abc".to_string(),
            reason: "connection refused".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("scope_cache_key/abc"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_validation_error_display_invalid_identifier() {
        let err = ValidationError::InvalidIdentifier {
            field: "table".to_string(),
            value: "comments; DROP".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("table"));
        assert!(msg.contains("comments; DROP"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "expires_in".to_string(),
            value: "0s".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("expires_in"));
        assert!(msg.contains("0s"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_scope_key_error_from_variants() {
        let dialect = ScopeKeyError::from(DialectError::Unsupported {
            adapter: "Oracle".to_string(),
        });
        assert!(matches!(dialect, ScopeKeyError::Dialect(_)));

        let query = ScopeKeyError::from(QueryError::ExecutionFailed {
            reason: "syntax error".to_string(),
        });
        assert!(matches!(query, ScopeKeyError::Query(_)));

        let store = ScopeKeyError::from(CacheStoreError::WriteFailed {
            key: "k".to_string(),
            reason: "full".to_string(),
        });
        assert!(matches!(store, ScopeKeyError::CacheStore(_)));

        let validation = ScopeKeyError::from(ValidationError::EmptyPredicate);
        assert!(matches!(validation, ScopeKeyError::Validation(_)));

        let config = ScopeKeyError::from(ConfigError::InvalidValue {
            field: "namespace".to_string(),
            value: String::new(),
            reason: "must not be empty".to_string(),
        });
        assert!(matches!(config, ScopeKeyError::Config(_)));
    }
}
