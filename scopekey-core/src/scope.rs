//! Scope descriptions
//!
//! A scope is a fully resolved, queryable row set: one table, its filters,
//! joins, ordering and an optional pagination window. Anything that can
//! describe such a row set implements [`Scope`]; [`ScopeSpec`] is the owned,
//! builder-style implementation used when no query layer is at hand.

use crate::{ScopeKeyResult, ValidationError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Primary key column used when a scope does not name one.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Last-modified column used when a scope does not name one.
pub const DEFAULT_UPDATED_AT: &str = "updated_at";

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("identifier pattern is valid")
});

// ============================================================================
// JOINS, ORDERING, PAGINATION
// ============================================================================

/// Kind of join applied to a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// `INNER JOIN` (an explicit join).
    Inner,
    /// `LEFT OUTER JOIN` (an eager-loaded include).
    LeftOuter,
}

impl JoinKind {
    /// SQL keyword for this join kind.
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::LeftOuter => "LEFT OUTER JOIN",
        }
    }
}

/// A join onto another table.
///
/// The `on` condition is opaque SQL and is passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub table: String,
    pub on: String,
}

impl JoinClause {
    /// Create an inner join.
    pub fn inner(table: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            kind: JoinKind::Inner,
            table: table.into(),
            on: on.into(),
        }
    }

    /// Create a left outer join.
    pub fn left_outer(table: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            kind: JoinKind::LeftOuter,
            table: table.into(),
            on: on.into(),
        }
    }
}

/// Sort direction for an ordering column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One ordering term.
///
/// `column` is either a bare column of the scope's table or a
/// `table.column` reference into a joined table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Offset/limit pagination window.
///
/// A window with only an offset skips rows and keeps the rest; a window with
/// only a limit keeps the first `limit` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Page {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl Page {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self {
            offset: Some(offset),
            limit: Some(limit),
        }
    }
}

// ============================================================================
// SCOPE TRAIT
// ============================================================================

/// A queryable row set whose cache key can be computed.
///
/// Implementors must hand over fully resolved state: filters, joins, ordering
/// and the pagination window are rendered exactly as returned here.
pub trait Scope: Send + Sync {
    /// Table the rows come from, optionally schema-qualified (`public.comments`).
    fn table_name(&self) -> &str;

    /// Primary key column of `table_name`.
    fn primary_key(&self) -> &str {
        DEFAULT_PRIMARY_KEY
    }

    /// Last-modified timestamp column of `table_name`.
    fn updated_at_column(&self) -> &str {
        DEFAULT_UPDATED_AT
    }

    /// Logical name used as the cache key prefix (e.g. `comments`).
    ///
    /// Defaults to the table name without its schema.
    fn model_key(&self) -> &str {
        let table = self.table_name();
        table.rsplit('.').next().unwrap_or(table)
    }

    /// Boolean SQL predicates, combined with `AND`.
    fn filters(&self) -> &[String] {
        &[]
    }

    fn joins(&self) -> &[JoinClause] {
        &[]
    }

    fn order(&self) -> &[OrderBy] {
        &[]
    }

    /// Pagination window, if any.
    fn page(&self) -> Option<Page> {
        None
    }

    /// Whether the scope selects a window rather than every matching row.
    fn is_paginated(&self) -> bool {
        self.page().is_some()
    }
}

/// Check every identifier and predicate a scope contributes to the SQL.
///
/// Identifiers are quoted when rendered, so only names matching
/// `[A-Za-z_][A-Za-z0-9_$]*` are accepted. Tables may carry one schema
/// qualifier and order terms one table qualifier. Join conditions and
/// filters are opaque SQL; filters must merely be non-blank.
pub fn validate_scope(scope: &dyn Scope) -> ScopeKeyResult<()> {
    check_qualified("table", scope.table_name())?;
    check_identifier("primary_key", scope.primary_key())?;
    check_identifier("updated_at_column", scope.updated_at_column())?;

    for join in scope.joins() {
        check_qualified("join.table", &join.table)?;
    }

    for term in scope.order() {
        check_qualified("order.column", &term.column)?;
    }

    if scope.filters().iter().any(|f| f.trim().is_empty()) {
        return Err(ValidationError::EmptyPredicate.into());
    }

    Ok(())
}

/// An identifier with at most one `qualifier.` prefix.
fn check_qualified(field: &str, value: &str) -> ScopeKeyResult<()> {
    match value.split_once('.') {
        Some((qualifier, name)) => {
            check_identifier(field, qualifier)?;
            check_identifier(field, name)
        }
        None => check_identifier(field, value),
    }
}

fn check_identifier(field: &str, value: &str) -> ScopeKeyResult<()> {
    if IDENTIFIER.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidIdentifier {
            field: field.to_string(),
            value: value.to_string(),
        }
        .into())
    }
}

// ============================================================================
// SCOPE SPEC
// ============================================================================

/// Owned scope description with a chaining builder.
///
/// ```
/// use scopekey_core::ScopeSpec;
///
/// let scope = ScopeSpec::new("comments")
///     .filter("comments.approved = TRUE")
///     .order_by("id")
///     .offset(20)
///     .limit(10);
/// assert!(scopekey_core::Scope::is_paginated(&scope));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeSpec {
    pub table: String,
    pub primary_key: String,
    pub updated_at_column: String,
    pub model_key: Option<String>,
    pub filters: Vec<String>,
    pub joins: Vec<JoinClause>,
    pub order: Vec<OrderBy>,
    pub page: Option<Page>,
}

impl ScopeSpec {
    /// Every row of `table`, with the default key columns.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            updated_at_column: DEFAULT_UPDATED_AT.to_string(),
            model_key: None,
            filters: Vec::new(),
            joins: Vec::new(),
            order: Vec::new(),
            page: None,
        }
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn with_updated_at_column(mut self, column: impl Into<String>) -> Self {
        self.updated_at_column = column.into();
        self
    }

    /// Override the logical name used as the key prefix.
    pub fn with_model_key(mut self, name: impl Into<String>) -> Self {
        self.model_key = Some(name.into());
        self
    }

    /// Add a boolean predicate.
    pub fn filter(mut self, predicate: impl Into<String>) -> Self {
        self.filters.push(predicate.into());
        self
    }

    /// Add an inner join.
    pub fn join(mut self, table: impl Into<String>, on: impl Into<String>) -> Self {
        self.joins.push(JoinClause::inner(table, on));
        self
    }

    /// Add an eager-loaded include, rendered as a left outer join.
    pub fn include(mut self, table: impl Into<String>, on: impl Into<String>) -> Self {
        self.joins.push(JoinClause::left_outer(table, on));
        self
    }

    /// Append an ascending ordering term.
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order.push(OrderBy::asc(column));
        self
    }

    /// Append a descending ordering term.
    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.order.push(OrderBy::desc(column));
        self
    }

    /// Replace any existing ordering with a single ascending term.
    pub fn reorder(mut self, column: impl Into<String>) -> Self {
        self.order.clear();
        self.order.push(OrderBy::asc(column));
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.page.get_or_insert_with(Page::default).offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.page.get_or_insert_with(Page::default).limit = Some(limit);
        self
    }

    /// Drop the pagination window.
    pub fn unpaginated(mut self) -> Self {
        self.page = None;
        self
    }
}

impl Scope for ScopeSpec {
    fn table_name(&self) -> &str {
        &self.table
    }

    fn primary_key(&self) -> &str {
        &self.primary_key
    }

    fn updated_at_column(&self) -> &str {
        &self.updated_at_column
    }

    fn model_key(&self) -> &str {
        match &self.model_key {
            Some(name) => name,
            None => self.table.rsplit('.').next().unwrap_or(&self.table),
        }
    }

    fn filters(&self) -> &[String] {
        &self.filters
    }

    fn joins(&self) -> &[JoinClause] {
        &self.joins
    }

    fn order(&self) -> &[OrderBy] {
        &self.order
    }

    fn page(&self) -> Option<Page> {
        self.page
    }
}

// =============================================================================
// TESTS
// =============================================================================
