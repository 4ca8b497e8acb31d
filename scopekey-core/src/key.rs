//! Cache key fragments and composition
//!
//! Keys are `/`-joined fragments. A scope contributes
//! `"{model_key}/{digest}"` (or `"{model_key}/empty"`), a record contributes
//! `"{model_key}/{id}-{updated_at}"`, and literals such as version tags pass
//! through unchanged.

use crate::Scope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Stands in for a digest when a scope matches no rows.
pub const EMPTY_DIGEST: &str = "empty";

/// Separator between key fragments.
pub const KEY_SEPARATOR: &str = "/";

/// Prefix of view fragment keys.
pub const FRAGMENT_KEY_PREFIX: &str = "views";

/// Timestamp format of record keys (UTC, nanosecond precision).
const RECORD_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%9f";

/// Format the key of a scope from its resolved digest.
///
/// A missing or blank digest means the scope is empty.
pub fn scope_key(model_key: &str, digest: Option<&str>) -> String {
    let digest = digest
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(EMPTY_DIGEST);
    format!("{}{}{}", model_key, KEY_SEPARATOR, digest)
}

/// Join already resolved fragments.
pub fn join_fragments<I, S>(fragments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for (i, fragment) in fragments.into_iter().enumerate() {
        if i > 0 {
            out.push_str(KEY_SEPARATOR);
        }
        out.push_str(fragment.as_ref());
    }
    out
}

// ============================================================================
// RECORD KEYS
// ============================================================================

/// Cache key of a single row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub model_key: String,
    /// `None` for a record that has not been persisted yet.
    pub id: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RecordKey {
    /// A persisted record with a last-modified timestamp.
    pub fn new(model_key: impl Into<String>, id: impl ToString, updated_at: DateTime<Utc>) -> Self {
        Self {
            model_key: model_key.into(),
            id: Some(id.to_string()),
            updated_at: Some(updated_at),
        }
    }

    /// A persisted record without a timestamp column.
    pub fn untimestamped(model_key: impl Into<String>, id: impl ToString) -> Self {
        Self {
            model_key: model_key.into(),
            id: Some(id.to_string()),
            updated_at: None,
        }
    }

    /// A record that has not been saved.
    pub fn unsaved(model_key: impl Into<String>) -> Self {
        Self {
            model_key: model_key.into(),
            id: None,
            updated_at: None,
        }
    }

    pub fn cache_key(&self) -> String {
        match (&self.id, &self.updated_at) {
            (None, _) => format!("{}{}new", self.model_key, KEY_SEPARATOR),
            (Some(id), None) => format!("{}{}{}", self.model_key, KEY_SEPARATOR, id),
            (Some(id), Some(ts)) => format!(
                "{}{}{}-{}",
                self.model_key,
                KEY_SEPARATOR,
                id,
                ts.format(RECORD_TIMESTAMP_FORMAT)
            ),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

// ============================================================================
// FRAGMENTS
// ============================================================================

/// One element of a composite key.
pub enum Fragment<'a> {
    /// Version tags and other fixed strings.
    Literal(Cow<'a, str>),
    /// A row set, resolved through its digest.
    Scope(&'a dyn Scope),
    /// A single row.
    Record(RecordKey),
}

impl<'a> Fragment<'a> {
    pub fn literal(value: impl Into<Cow<'a, str>>) -> Self {
        Self::Literal(value.into())
    }

    pub fn scope(scope: &'a dyn Scope) -> Self {
        Self::Scope(scope)
    }
}

impl fmt::Debug for Fragment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            Self::Scope(s) => f.debug_tuple("Scope").field(&s.model_key()).finish(),
            Self::Record(r) => f.debug_tuple("Record").field(r).finish(),
        }
    }
}

impl<'a> From<&'a str> for Fragment<'a> {
    fn from(value: &'a str) -> Self {
        Self::Literal(Cow::Borrowed(value))
    }
}

impl From<String> for Fragment<'_> {
    fn from(value: String) -> Self {
        Self::Literal(Cow::Owned(value))
    }
}

impl From<RecordKey> for Fragment<'_> {
    fn from(value: RecordKey) -> Self {
        Self::Record(value)
    }
}

// =============================================================================
// TESTS
// =============================================================================
