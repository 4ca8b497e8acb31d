//! scopekey PostgreSQL Connection
//!
//! Runs digest queries on PostgreSQL through a deadpool-postgres connection
//! pool. Digest queries are plain read-only `SELECT`s returning one text
//! value, so the simple `query_opt` path is all that is needed.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use scopekey_core::{DatabaseConnection, Dialect, QueryError, ScopeKeyResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_postgres::NoTls;

/// Adapter name reported to dialect resolution.
pub const ADAPTER_NAME: &str = "PostgreSQL";

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    #[serde(skip_serializing, default)]
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// How long to wait for a pooled connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "scopekey".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("SCOPEKEY_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("SCOPEKEY_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("SCOPEKEY_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("SCOPEKEY_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("SCOPEKEY_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("SCOPEKEY_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: std::env::var("SCOPEKEY_DB_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    /// Create a connection pool from this configuration.
    ///
    /// No connection is opened until the first query.
    pub fn create_pool(&self) -> ScopeKeyResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| QueryError::ConnectionFailed {
                reason: format!("Failed to create pool: {}", e),
            })?;

        Ok(pool)
    }
}

// ============================================================================
// CONNECTION
// ============================================================================

/// [`DatabaseConnection`] over a PostgreSQL pool.
#[derive(Clone)]
pub struct PgConnection {
    pool: Pool,
}

impl PgConnection {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> ScopeKeyResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    pub fn from_env() -> ScopeKeyResult<Self> {
        Self::from_config(&DbConfig::from_env())
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> ScopeKeyResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| pool_error(&e).into())
    }
}

#[async_trait]
impl DatabaseConnection for PgConnection {
    fn adapter_name(&self) -> &str {
        ADAPTER_NAME
    }

    fn dialect(&self) -> ScopeKeyResult<Dialect> {
        Ok(Dialect::ArrayAggregate)
    }

    async fn select_value(&self, sql: &str) -> ScopeKeyResult<Option<String>> {
        let conn = self.get_conn().await?;

        let row = conn
            .query_opt(sql, &[])
            .await
            .map_err(|e| execution_error(&e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        row.try_get::<_, Option<String>>(0).map_err(|e| {
            QueryError::UnexpectedResult {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

fn execution_error(err: &tokio_postgres::Error) -> QueryError {
    tracing::error!("Digest query failed: {:?}", err);
    match err.as_db_error() {
        Some(db) => QueryError::ExecutionFailed {
            reason: format!("{}: {}", db.code().code(), db.message()),
        },
        None => QueryError::ConnectionFailed {
            reason: err.to_string(),
        },
    }
}

fn pool_error(err: &deadpool_postgres::PoolError) -> QueryError {
    tracing::error!("Connection pool error: {:?}", err);
    let reason = match err {
        deadpool_postgres::PoolError::Timeout(_) => "Connection pool exhausted".to_string(),
        deadpool_postgres::PoolError::Closed => "Connection pool is closed".to_string(),
        other => format!("Failed to acquire database connection: {}", other),
    };
    QueryError::ConnectionFailed { reason }
}

// ============================================================================
// TESTS
// ============================================================================
