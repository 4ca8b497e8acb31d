//! Client-side reference digests
//!
//! Reproduces, in process, the value each digest query returns given the row
//! pairs as the engine renders them to text (see
//! [`Dialect::render_timestamp`]). This is the slow path the database
//! aggregate exists to avoid; it is kept for verification, fixtures and
//! benchmarks.

use crate::Dialect;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// The `(id, last_modified)` pair of one row, as the database renders them
/// to text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowStamp {
    pub id: String,
    pub updated_at: Option<String>,
}

impl RowStamp {
    pub fn new(id: impl ToString, updated_at: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            updated_at: Some(updated_at.into()),
        }
    }

    /// A row whose last-modified column is NULL.
    pub fn without_timestamp(id: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            updated_at: None,
        }
    }

    /// `"{id}-{updated_at}"`, or `None` when the timestamp is NULL (SQL string
    /// concatenation with NULL yields NULL).
    pub fn pair(&self) -> Option<String> {
        self.updated_at
            .as_ref()
            .map(|ts| format!("{}-{}", self.id, ts))
    }
}

impl Dialect {
    /// Render a microsecond-precision timestamp the way the engine casts it
    /// to text.
    ///
    /// PostgreSQL's `timestamp::text` trims trailing fractional zeros and
    /// drops the point entirely for whole seconds. MySQL renders a
    /// `DATETIME(6)` column with all six digits.
    pub fn render_timestamp(&self, at: NaiveDateTime) -> String {
        let full = at.format("%Y-%m-%d %H:%M:%S%.6f").to_string();
        match self {
            Self::ArrayAggregate => {
                let trimmed = full.trim_end_matches('0');
                trimmed.strip_suffix('.').unwrap_or(trimmed).to_string()
            }
            Self::ConcatAggregate => full,
        }
    }

    /// Digest `rows` the way this dialect's query would.
    ///
    /// `rows` must already be in the order the aggregate sees them: primary
    /// key order for full scopes, window order for concat-aggregated pages.
    /// Returns `None` where the database would return NULL.
    pub fn client_digest(&self, rows: &[RowStamp]) -> Option<String> {
        match self {
            Self::ArrayAggregate => array_digest(rows),
            Self::ConcatAggregate => concat_digest(rows),
        }
    }
}

/// `md5(array_agg(pair)::text)`.
pub fn array_digest(rows: &[RowStamp]) -> Option<String> {
    if rows.is_empty() {
        return None;
    }
    let elements: Vec<String> = rows
        .iter()
        .map(|row| match row.pair() {
            Some(pair) => array_element(&pair),
            None => "NULL".to_string(),
        })
        .collect();
    Some(md5_hex(&format!("{{{}}}", elements.join(","))))
}

/// `MD5(GROUP_CONCAT(pair SEPARATOR '|'))`; NULL pairs are skipped.
pub fn concat_digest(rows: &[RowStamp]) -> Option<String> {
    let pairs: Vec<String> = rows.iter().filter_map(RowStamp::pair).collect();
    if pairs.is_empty() {
        return None;
    }
    Some(md5_hex(&pairs.join("|")))
}

/// Lowercase hex MD5, as returned by both engines' `md5()`.
pub fn md5_hex(text: &str) -> String {
    format!("{:x}", md5::compute(text.as_bytes()))
}

/// Render one text element of a PostgreSQL array literal.
fn array_element(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value.eq_ignore_ascii_case("null")
        || value
            .chars()
            .any(|c| matches!(c, '{' | '}' | ',' | '"' | '\\') || c.is_ascii_whitespace());

    if !needs_quotes {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

// =============================================================================
// TESTS
// =============================================================================
