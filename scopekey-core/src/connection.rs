//! Database connection collaborator

use crate::{Dialect, ScopeKeyResult};
use async_trait::async_trait;

/// A database connection able to run digest queries.
///
/// Implementations only ever receive SELECT statements producing a single
/// scalar. Errors are surfaced as [`crate::QueryError`] and are not retried.
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Adapter or engine name, e.g. `PostgreSQL` or `Mysql2`.
    fn adapter_name(&self) -> &str;

    /// Digest dialect for this connection.
    ///
    /// Fails with [`crate::DialectError::Unsupported`] for engines without a
    /// digest strategy.
    fn dialect(&self) -> ScopeKeyResult<Dialect> {
        Dialect::for_adapter(self.adapter_name())
    }

    /// Run `sql` and return the first column of the first row.
    ///
    /// SQL NULL and an empty result both map to `None`.
    async fn select_value(&self, sql: &str) -> ScopeKeyResult<Option<String>>;
}
