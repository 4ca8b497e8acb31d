//! Digest SQL generation
//!
//! Each supported engine gets a [`DigestStrategy`] that wraps a scope's row
//! set in a single aggregate query returning one scalar: the MD5 digest of
//! every `"{id}-{updated_at}"` pair, or NULL when the scope is empty.
//!
//! - [`ArrayAggregateDialect`] (PostgreSQL) collects the pairs with
//!   `array_agg`, ordered by primary key, and hashes the array's text form.
//! - [`ConcatAggregateDialect`] (MySQL) joins the pairs with `GROUP_CONCAT`
//!   and hashes the concatenated string.
//!
//! Ordered aggregates do not compose with `LIMIT`/`OFFSET` applied afterwards,
//! so paginated scopes are first materialised as a derived table holding only
//! the windowed pairs, and the aggregate runs over that table.

use crate::{validate_scope, DialectError, Scope, ScopeKeyResult};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Largest row count MySQL accepts in `LIMIT`; used for offset-only windows.
const MYSQL_MAX_LIMIT: u64 = u64::MAX;

/// Alias of the derived table the digest aggregates over.
const DERIVED_TABLE: &str = "query";

/// Separator between concatenated pairs.
const PAIR_SEPARATOR: &str = "|";

/// Digest SQL flavour, chosen once per database connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// `md5(array_agg(...)::text)` (PostgreSQL).
    ArrayAggregate,
    /// `MD5(GROUP_CONCAT(...))` (MySQL, MariaDB).
    ConcatAggregate,
}

impl Dialect {
    /// Resolve the dialect for a database adapter or engine name.
    ///
    /// Matching is case-insensitive. Engines other than PostgreSQL and
    /// MySQL/MariaDB fail with [`DialectError::Unsupported`].
    pub fn for_adapter(adapter: &str) -> ScopeKeyResult<Self> {
        match adapter.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "postgis" | "pg" => Ok(Self::ArrayAggregate),
            "mysql" | "mysql2" | "mariadb" | "trilogy" => Ok(Self::ConcatAggregate),
            _ => Err(DialectError::Unsupported {
                adapter: adapter.to_string(),
            }
            .into()),
        }
    }

    /// The strategy implementing this dialect.
    pub fn strategy(&self) -> &'static dyn DigestStrategy {
        match self {
            Self::ArrayAggregate => &ArrayAggregateDialect,
            Self::ConcatAggregate => &ConcatAggregateDialect,
        }
    }

    /// Quote an identifier for this dialect.
    pub fn quote(&self, ident: &str) -> String {
        match self {
            Self::ArrayAggregate => format!("\"{}\"", ident),
            Self::ConcatAggregate => format!("`{}`", ident),
        }
    }

    /// Quote a possibly qualified name (`schema.table`) part by part.
    pub fn quote_qualified(&self, name: &str) -> String {
        match name.split_once('.') {
            Some((qualifier, ident)) => format!("{}.{}", self.quote(qualifier), self.quote(ident)),
            None => self.quote(name),
        }
    }

    /// Build the digest query for `scope`.
    pub fn build_digest_sql(&self, scope: &dyn Scope) -> ScopeKeyResult<String> {
        self.strategy().build_digest_sql(scope)
    }
}

/// Build the single-scalar digest query for `scope` in `dialect`.
pub fn build_digest_sql(scope: &dyn Scope, dialect: Dialect) -> ScopeKeyResult<String> {
    dialect.build_digest_sql(scope)
}

/// Contract shared by the digest strategies.
pub trait DigestStrategy: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Emit SQL returning the digest of `scope`'s row set (NULL when empty).
    ///
    /// Filters and joins are rendered untouched; the scope is validated first.
    fn build_digest_sql(&self, scope: &dyn Scope) -> ScopeKeyResult<String>;
}

/// PostgreSQL strategy: hash of the primary-key ordered `array_agg` of pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayAggregateDialect;

impl DigestStrategy for ArrayAggregateDialect {
    fn dialect(&self) -> Dialect {
        Dialect::ArrayAggregate
    }

    fn build_digest_sql(&self, scope: &dyn Scope) -> ScopeKeyResult<String> {
        validate_scope(scope)?;
        let sql = ScopeSql::new(scope, Dialect::ArrayAggregate);

        let projection = format!(
            "{} AS row_id, {} AS row_updated_at",
            sql.column(scope.primary_key()),
            sql.column(scope.updated_at_column()),
        );

        Ok(format!(
            "SELECT md5(array_agg({d}.row_id::text || '-' || {d}.row_updated_at::text \
             ORDER BY {d}.row_id)::text) FROM ({inner}) AS {d}",
            d = DERIVED_TABLE,
            inner = sql.select(&projection),
        ))
    }
}

/// MySQL strategy: hash of `GROUP_CONCAT` over pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatAggregateDialect;

impl DigestStrategy for ConcatAggregateDialect {
    fn dialect(&self) -> Dialect {
        Dialect::ConcatAggregate
    }

    fn build_digest_sql(&self, scope: &dyn Scope) -> ScopeKeyResult<String> {
        validate_scope(scope)?;
        let sql = ScopeSql::new(scope, Dialect::ConcatAggregate);
        let id = sql.column(scope.primary_key());
        let updated_at = sql.column(scope.updated_at_column());

        if scope.is_paginated() {
            let projection = format!("CONCAT({}, '-', {}) AS row_key", id, updated_at);
            return Ok(format!(
                "SELECT MD5(GROUP_CONCAT({d}.row_key SEPARATOR '{sep}')) FROM ({inner}) AS {d}",
                d = DERIVED_TABLE,
                sep = PAIR_SEPARATOR,
                inner = sql.select(&projection),
            ));
        }

        let mut out = format!(
            "SELECT MD5(GROUP_CONCAT({id}, '-', {updated_at} ORDER BY {id} ASC SEPARATOR '{sep}'))",
            id = id,
            updated_at = updated_at,
            sep = PAIR_SEPARATOR,
        );
        sql.write_from(&mut out);
        sql.write_where(&mut out);
        Ok(out)
    }
}

// ============================================================================
// SCOPE RENDERING
// ============================================================================

/// Renders the clauses of a scope for one dialect.
struct ScopeSql<'a> {
    scope: &'a dyn Scope,
    dialect: Dialect,
}

impl<'a> ScopeSql<'a> {
    fn new(scope: &'a dyn Scope, dialect: Dialect) -> Self {
        Self { scope, dialect }
    }

    /// `"table"."column"` for a column of the scope's own table.
    fn column(&self, column: &str) -> String {
        format!(
            "{}.{}",
            self.dialect.quote_qualified(self.scope.table_name()),
            self.dialect.quote(column)
        )
    }

    /// An ordering reference, either bare or `table.column`.
    fn order_column(&self, column: &str) -> String {
        if column.contains('.') {
            self.dialect.quote_qualified(column)
        } else {
            self.column(column)
        }
    }

    /// The scope's own query with `projection` as its select list.
    ///
    /// Ordering and the window are only rendered for paginated scopes; for a
    /// full row set they cannot affect the aggregate.
    fn select(&self, projection: &str) -> String {
        let mut out = format!("SELECT {}", projection);
        self.write_from(&mut out);
        self.write_where(&mut out);
        if let Some(page) = self.scope.page() {
            self.write_order(&mut out);
            self.write_window(&mut out, page.offset, page.limit);
        }
        out
    }

    fn write_from(&self, out: &mut String) {
        let _ = write!(out, " FROM {}", self.dialect.quote_qualified(self.scope.table_name()));
        for join in self.scope.joins() {
            let _ = write!(
                out,
                " {} {} ON {}",
                join.kind.keyword(),
                self.dialect.quote_qualified(&join.table),
                join.on
            );
        }
    }

    fn write_where(&self, out: &mut String) {
        let filters = self.scope.filters();
        if filters.is_empty() {
            return;
        }
        let predicates: Vec<String> = filters.iter().map(|f| format!("({})", f)).collect();
        let _ = write!(out, " WHERE {}", predicates.join(" AND "));
    }

    /// Scope ordering, falling back to primary key so windows are stable.
    fn write_order(&self, out: &mut String) {
        let order = self.scope.order();
        if order.is_empty() {
            let _ = write!(out, " ORDER BY {} ASC", self.column(self.scope.primary_key()));
            return;
        }
        let terms: Vec<String> = order
            .iter()
            .map(|term| format!("{} {}", self.order_column(&term.column), term.direction.keyword()))
            .collect();
        let _ = write!(out, " ORDER BY {}", terms.join(", "));
    }

    fn write_window(&self, out: &mut String, offset: Option<u64>, limit: Option<u64>) {
        match (self.dialect, limit, offset) {
            (_, Some(limit), _) => {
                let _ = write!(out, " LIMIT {}", limit);
            }
            // MySQL has no OFFSET without LIMIT.
            (Dialect::ConcatAggregate, None, Some(_)) => {
                let _ = write!(out, " LIMIT {}", MYSQL_MAX_LIMIT);
            }
            _ => {}
        }
        if let Some(offset) = offset {
            let _ = write!(out, " OFFSET {}", offset);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
