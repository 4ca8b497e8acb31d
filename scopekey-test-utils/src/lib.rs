//! scopekey Test Utilities
//!
//! Centralized test infrastructure for the scopekey workspace:
//! - An in-memory database that answers registered digest queries
//! - Cache store doubles with failure injection
//! - Proptest generators for scopes, pages and rows
//! - Test fixtures for the comments/posts scenario
//! - Custom assertions for key shapes and error variants

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

// Re-export commonly used types for convenience
pub use scopekey_core::{
    CacheEntry, CacheStore, CacheStoreError, DatabaseConnection, Dialect, Page, QueryError,
    RowStamp, Scope, ScopeKeyError, ScopeKeyResult, ScopeSpec, SortDirection,
};

/// 2024-01-01T00:00:00Z, the fixture clock's starting point.
const CLOCK_START: i64 = 1_704_067_200;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Install a fmt subscriber for tests, honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// FIXTURE DATABASE
// ============================================================================

/// One row of a fixture table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureRow {
    pub id: i64,
    pub updated_at: Option<DateTime<Utc>>,
    pub fields: BTreeMap<String, String>,
}

impl FixtureRow {
    pub fn new(id: i64, updated_at: DateTime<Utc>) -> Self {
        Self {
            id,
            updated_at: Some(updated_at),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.fields.insert(name.into(), value.to_string());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// The row as `dialect`'s digest aggregate sees it.
    pub fn stamp(&self, dialect: Dialect) -> RowStamp {
        match self.updated_at {
            Some(ts) => RowStamp::new(self.id, dialect.render_timestamp(ts.naive_utc())),
            None => RowStamp::without_timestamp(self.id),
        }
    }
}

/// Row filter standing in for a scope's SQL predicates.
pub type RowPredicate = Arc<dyn Fn(&FixtureRow) -> bool + Send + Sync>;

#[derive(Clone)]
struct RegisteredView {
    table: String,
    predicate: RowPredicate,
    page: Option<Page>,
    descending: bool,
}

/// In-memory [`DatabaseConnection`] for digest tests.
///
/// Scopes are registered together with a row predicate mirroring their
/// filters; the digest SQL built for them is then answered by digesting the
/// matching rows client-side. Rows are ordered by primary key, descending
/// when the scope's first ordering is descending. Joins are not evaluated.
pub struct FixtureDatabase {
    adapter: String,
    dialect: Dialect,
    tables: Mutex<HashMap<String, Vec<FixtureRow>>>,
    views: Mutex<HashMap<String, RegisteredView>>,
    clock: Mutex<DateTime<Utc>>,
    queries: AtomicUsize,
    offline: AtomicBool,
}

impl FixtureDatabase {
    /// Create a database reporting `adapter` as its adapter name.
    pub fn new(adapter: impl Into<String>) -> ScopeKeyResult<Self> {
        let adapter = adapter.into();
        let dialect = Dialect::for_adapter(&adapter)?;
        Ok(Self::build(adapter, dialect))
    }

    pub fn postgres() -> Self {
        Self::for_dialect(Dialect::ArrayAggregate)
    }

    pub fn mysql() -> Self {
        Self::for_dialect(Dialect::ConcatAggregate)
    }

    pub fn for_dialect(dialect: Dialect) -> Self {
        let adapter = match dialect {
            Dialect::ArrayAggregate => "PostgreSQL",
            Dialect::ConcatAggregate => "Mysql2",
        };
        Self::build(adapter.to_string(), dialect)
    }

    fn build(adapter: String, dialect: Dialect) -> Self {
        Self {
            adapter,
            dialect,
            tables: Mutex::new(HashMap::new()),
            views: Mutex::new(HashMap::new()),
            clock: Mutex::new(DateTime::<Utc>::from_timestamp(CLOCK_START, 0).unwrap_or_default()),
            queries: AtomicUsize::new(0),
            offline: AtomicBool::new(false),
        }
    }

    pub fn fixture_dialect(&self) -> Dialect {
        self.dialect
    }

    /// Advance the fixture clock by one second and return it.
    pub fn tick(&self) -> DateTime<Utc> {
        let mut clock = lock(&self.clock);
        *clock += TimeDelta::seconds(1);
        *clock
    }

    pub fn insert(&self, table: &str, row: FixtureRow) {
        lock(&self.tables)
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    /// Insert a row stamped with the next clock tick.
    pub fn insert_row(&self, table: &str, id: i64) -> FixtureRow {
        let row = FixtureRow::new(id, self.tick());
        self.insert(table, row.clone());
        row
    }

    /// Insert rows `1..=count`, each with its own timestamp.
    pub fn seed(&self, table: &str, count: i64) {
        for id in 1..=count {
            self.insert_row(table, id);
        }
    }

    /// Bump a row's timestamp to the next clock tick. Returns whether it existed.
    pub fn touch(&self, table: &str, id: i64) -> bool {
        let now = self.tick();
        let mut tables = lock(&self.tables);
        match tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|row| row.id == id))
        {
            Some(row) => {
                row.updated_at = Some(now);
                true
            }
            None => false,
        }
    }

    /// Remove a row. Returns whether it existed.
    pub fn delete(&self, table: &str, id: i64) -> bool {
        let mut tables = lock(&self.tables);
        let Some(rows) = tables.get_mut(table) else {
            return false;
        };
        let before = rows.len();
        rows.retain(|row| row.id != id);
        rows.len() != before
    }

    pub fn rows(&self, table: &str) -> Vec<FixtureRow> {
        lock(&self.tables).get(table).cloned().unwrap_or_default()
    }

    /// Register `scope` with the predicate its filters stand for.
    ///
    /// Returns the digest SQL the database will answer.
    pub fn register<F>(&self, scope: &dyn Scope, predicate: F) -> ScopeKeyResult<String>
    where
        F: Fn(&FixtureRow) -> bool + Send + Sync + 'static,
    {
        let sql = self.dialect.build_digest_sql(scope)?;
        let view = RegisteredView {
            table: scope.table_name().to_string(),
            predicate: Arc::new(predicate),
            page: scope.page(),
            descending: scope
                .order()
                .first()
                .is_some_and(|o| o.direction == SortDirection::Desc),
        };
        lock(&self.views).insert(sql.clone(), view);
        Ok(sql)
    }

    /// Register a scope that matches every row of its table.
    pub fn register_all(&self, scope: &dyn Scope) -> ScopeKeyResult<String> {
        self.register(scope, |_| true)
    }

    /// The digest a registered query currently evaluates to, without
    /// counting a round-trip.
    pub fn expected_digest(&self, sql: &str) -> Option<String> {
        let view = lock(&self.views).get(sql).cloned()?;
        self.evaluate(&view)
    }

    /// Digest queries answered so far, including failed ones.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn reset_query_count(&self) {
        self.queries.store(0, Ordering::SeqCst);
    }

    /// Make every query fail with a connection error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn evaluate(&self, view: &RegisteredView) -> Option<String> {
        let mut rows: Vec<FixtureRow> = lock(&self.tables)
            .get(&view.table)
            .map(|rows| rows.iter().filter(|row| (view.predicate)(row)).cloned().collect())
            .unwrap_or_default();

        rows.sort_by_key(|row| row.id);
        if view.descending {
            rows.reverse();
        }

        if let Some(page) = view.page {
            let offset = page.offset.map_or(0, to_usize);
            let limit = page.limit.map_or(usize::MAX, to_usize);
            rows = rows.into_iter().skip(offset).take(limit).collect();
        }

        // Only concat-aggregated pages keep window order.
        if self.dialect == Dialect::ArrayAggregate || view.page.is_none() {
            rows.sort_by_key(|row| row.id);
        }

        let stamps: Vec<RowStamp> = rows.iter().map(|row| row.stamp(self.dialect)).collect();
        self.dialect.client_digest(&stamps)
    }
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

#[async_trait]
impl DatabaseConnection for FixtureDatabase {
    fn adapter_name(&self) -> &str {
        &self.adapter
    }

    async fn select_value(&self, sql: &str) -> ScopeKeyResult<Option<String>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(sql = %sql, "Fixture query");

        if self.offline.load(Ordering::SeqCst) {
            return Err(QueryError::ConnectionFailed {
                reason: "fixture database is offline".to_string(),
            }
            .into());
        }

        let view = lock(&self.views).get(sql).cloned().ok_or_else(|| {
            QueryError::ExecutionFailed {
                reason: format!("unregistered query: {}", sql),
            }
        })?;

        Ok(self.evaluate(&view))
    }
}

// ============================================================================
// CACHE STORE DOUBLES
// ============================================================================

/// Map-backed [`CacheStore`] that records traffic and can be told to fail.
///
/// Entries are never evicted; use [`RecordingCacheStore::expire_all`] to
/// simulate the passage of `expires_in`.
#[derive(Default)]
pub struct RecordingCacheStore {
    entries: Mutex<HashMap<String, (CacheEntry, Duration)>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl RecordingCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose reads and writes all fail.
    pub fn failing() -> Self {
        let store = Self::default();
        store.set_fail_reads(true);
        store.set_fail_writes(true);
        store
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        lock(&self.entries).get(key).map(|(entry, _)| entry.clone())
    }

    /// The eviction horizon the entry was written with.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        lock(&self.entries).get(key).map(|(_, ttl)| *ttl)
    }

    /// Write an entry directly, bypassing the counters.
    pub fn insert(&self, key: &str, entry: CacheEntry) {
        lock(&self.entries).insert(key.to_string(), (entry, Duration::ZERO));
    }

    /// Push every entry's expiry an hour into the past, beyond any race window.
    pub fn expire_all(&self) {
        let long_ago = Utc::now() - TimeDelta::hours(1);
        for (entry, _) in lock(&self.entries).values_mut() {
            entry.expires_at = long_ago;
        }
    }
}

#[async_trait]
impl CacheStore for RecordingCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheStoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheStoreError::ReadFailed {
                key: key.to_string(),
                reason: "store unavailable".to_string(),
            });
        }
        Ok(self.entry(key))
    }

    async fn put(&self, key: &str, entry: CacheEntry, ttl: Duration) -> Result<(), CacheStoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheStoreError::WriteFailed {
                key: key.to_string(),
                reason: "store unavailable".to_string(),
            });
        }
        lock(&self.entries).insert(key.to_string(), (entry, ttl));
        Ok(())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for scopekey types.

    use super::*;
    use proptest::collection::vec;
    use proptest::option;
    use proptest::prelude::*;

    /// Identifiers accepted by scope validation.
    pub fn arb_identifier() -> impl Strategy<Value = String> {
        "[a-z_][a-z0-9_]{0,15}"
    }

    /// Strings that scope validation must reject as identifiers.
    pub fn arb_invalid_identifier() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            "[0-9][a-z0-9_]{0,8}",
            "[a-z]{1,8}[ ;\"`'()=-][a-z]{0,8}",
        ]
    }

    /// Simple comparison predicates.
    pub fn arb_predicate() -> impl Strategy<Value = String> {
        ("[a-z_]{1,10}", 0..10_000i64).prop_map(|(column, value)| format!("{} = {}", column, value))
    }

    pub fn arb_page() -> impl Strategy<Value = Page> {
        prop_oneof![
            (0..1_000u64, 0..100u64).prop_map(|(offset, limit)| Page::new(offset, limit)),
            (0..1_000u64).prop_map(|offset| Page {
                offset: Some(offset),
                limit: None,
            }),
            (0..100u64).prop_map(|limit| Page {
                offset: None,
                limit: Some(limit),
            }),
        ]
    }

    /// Valid scopes with arbitrary filters, ordering and pagination.
    pub fn arb_scope_spec() -> impl Strategy<Value = ScopeSpec> {
        (
            arb_identifier(),
            vec(arb_predicate(), 0..3),
            option::of((arb_identifier(), any::<bool>())),
            option::of(arb_page()),
        )
            .prop_map(|(table, filters, order, page)| {
                let mut scope = ScopeSpec::new(table);
                for filter in filters {
                    scope = scope.filter(filter);
                }
                scope = match order {
                    Some((column, true)) => scope.order_by_desc(column),
                    Some((column, false)) => scope.order_by(column),
                    None => scope,
                };
                scope.page = page;
                scope
            })
    }

    pub fn arb_dialect() -> impl Strategy<Value = Dialect> {
        prop_oneof![Just(Dialect::ArrayAggregate), Just(Dialect::ConcatAggregate)]
    }

    pub fn arb_row_stamp() -> impl Strategy<Value = RowStamp> {
        (1..1_000_000i64, option::weighted(0.9, 0..1_000_000_000i64)).prop_map(|(id, ts)| match ts {
            Some(secs) => RowStamp::new(id, format!("{}", secs)),
            None => RowStamp::without_timestamp(id),
        })
    }

    pub fn arb_row_stamps(max: usize) -> impl Strategy<Value = Vec<RowStamp>> {
        vec(arb_row_stamp(), 0..=max)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! The comments/posts scenario used across the integration tests.

    use super::*;

    pub const COMMENTS: &str = "comments";
    pub const POSTS: &str = "posts";

    pub fn comments_scope() -> ScopeSpec {
        ScopeSpec::new(COMMENTS)
    }

    /// Comments belonging to one post.
    pub fn post_comments(post_id: i64) -> ScopeSpec {
        ScopeSpec::new(COMMENTS).filter(format!("comments.post_id = {}", post_id))
    }

    pub fn posts_scope() -> ScopeSpec {
        ScopeSpec::new(POSTS)
    }

    /// Predicate matching [`post_comments`].
    pub fn on_post(post_id: i64) -> impl Fn(&FixtureRow) -> bool + Send + Sync + 'static {
        let expected = post_id.to_string();
        move |row| row.field("post_id") == Some(expected.as_str())
    }

    /// Six comments spread over posts 1 and 2, and an empty posts table.
    pub fn comments_database(dialect: Dialect) -> FixtureDatabase {
        let db = FixtureDatabase::for_dialect(dialect);
        for id in 1..=6 {
            let post_id = if id % 2 == 0 { 2 } else { 1 };
            db.insert(COMMENTS, FixtureRow::new(id, db.tick()).with_field("post_id", post_id));
        }
        db
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for key shapes and scopekey error variants.

    use super::*;

    /// Assert `key` is `{model}/` followed by 32 lowercase hex digits.
    #[track_caller]
    pub fn assert_digest_key(key: &str, model: &str) {
        let digest = key
            .strip_prefix(model)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or_else(|| panic!("Expected key under {:?}, got {:?}", model, key));
        assert!(
            digest.len() == 32
                && digest
                    .chars()
                    .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)),
            "Expected 32 hex digit digest, got {:?}",
            digest
        );
    }

    #[track_caller]
    pub fn assert_empty_key(key: &str, model: &str) {
        assert_eq!(key, format!("{}/empty", model));
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &ScopeKeyResult<T>) {
        match result {
            Err(ScopeKeyError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_dialect_error<T: std::fmt::Debug>(result: &ScopeKeyResult<T>) {
        match result {
            Err(ScopeKeyError::Dialect(_)) => {}
            other => panic!("Expected Dialect error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_query_error<T: std::fmt::Debug>(result: &ScopeKeyResult<T>) {
        match result {
            Err(ScopeKeyError::Query(_)) => {}
            other => panic!("Expected Query error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::assertions::*;
    use super::fixtures::*;
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_fixture_answers_registered_query() {
        let db = comments_database(Dialect::ArrayAggregate);
        let sql = db.register(&post_comments(1), on_post(1)).unwrap();

        let digest = db.select_value(&sql).await.unwrap();
        assert_eq!(digest, db.expected_digest(&sql));
        assert!(digest.is_some());
        assert_eq!(db.query_count(), 1);
    }

    #[tokio::test]
    async fn test_fixture_empty_scope_is_null() {
        let db = comments_database(Dialect::ConcatAggregate);
        let sql = db.register(&post_comments(9), on_post(9)).unwrap();
        assert_eq!(db.select_value(&sql).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fixture_rejects_unregistered_query() {
        let db = FixtureDatabase::postgres();
        assert_query_error(&db.select_value("SELECT 1").await);
    }

    #[tokio::test]
    async fn test_fixture_offline() {
        let db = comments_database(Dialect::ArrayAggregate);
        let sql = db.register_all(&comments_scope()).unwrap();
        db.set_offline(true);
        assert_query_error(&db.select_value(&sql).await);
        assert_eq!(db.query_count(), 1);
    }

    #[test]
    fn test_touch_changes_digest() {
        let db = comments_database(Dialect::ArrayAggregate);
        let sql = db.register_all(&comments_scope()).unwrap();
        let before = db.expected_digest(&sql);

        assert!(db.touch(COMMENTS, 3));
        assert_ne!(db.expected_digest(&sql), before);
        assert!(!db.touch(COMMENTS, 99));
    }

    #[test]
    fn test_fixture_stamps_render_like_the_engine() {
        let ts = DateTime::<Utc>::from_timestamp(CLOCK_START + 2, 500_000_000).unwrap();
        let row = FixtureRow::new(2, ts);

        let pg = FixtureDatabase::postgres();
        assert_eq!(pg.fixture_dialect(), Dialect::ArrayAggregate);
        assert_eq!(
            row.stamp(pg.fixture_dialect()).pair().as_deref(),
            Some("2-2024-01-01 00:00:02.5")
        );

        let mysql = FixtureDatabase::mysql();
        assert_eq!(mysql.fixture_dialect(), Dialect::ConcatAggregate);
        assert_eq!(
            row.stamp(mysql.fixture_dialect()).pair().as_deref(),
            Some("2-2024-01-01 00:00:02.500000")
        );
    }

    #[test]
    fn test_fixture_digest_uses_whole_second_text_on_postgres() {
        let db = FixtureDatabase::postgres();
        db.seed(COMMENTS, 1);
        let sql = db.register_all(&comments_scope()).unwrap();
        assert_eq!(
            db.expected_digest(&sql),
            Some(scopekey_core::md5_hex("{\"1-2024-01-01 00:00:01\"}"))
        );
    }

    #[test]
    fn test_delete_and_insert() {
        let db = comments_database(Dialect::ConcatAggregate);
        assert!(db.delete(COMMENTS, 1));
        assert!(!db.delete(COMMENTS, 1));
        assert_eq!(db.rows(COMMENTS).len(), 5);

        db.insert_row(COMMENTS, 7);
        assert_eq!(db.rows(COMMENTS).len(), 6);
    }

    #[test]
    fn test_unsupported_adapter() {
        assert!(FixtureDatabase::new("SQLite").is_err());
        assert!(FixtureDatabase::new("PostgreSQL").is_ok());
    }

    #[tokio::test]
    async fn test_recording_store_failures() {
        let store = RecordingCacheStore::failing();
        assert!(store.get("k").await.is_err());
        assert!(store
            .put("k", CacheEntry::new(None, Utc::now(), Duration::from_secs(1)), Duration::from_secs(2))
            .await
            .is_err());
        assert_eq!(store.gets(), 1);
        assert_eq!(store.puts(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_key_assertions() {
        assert_digest_key("comments/0b27dac757428d88c0f3a0298eb0278f", "comments");
        assert_empty_key("comments/empty", "comments");
    }

    #[test]
    #[should_panic]
    fn test_digest_key_assertion_rejects_sentinel() {
        assert_digest_key("comments/empty", "comments");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// Property: generated scopes always build digest SQL
        #[test]
        fn prop_generated_scope_is_valid(
            scope in generators::arb_scope_spec(),
            dialect in generators::arb_dialect(),
        ) {
            prop_assert!(dialect.build_digest_sql(&scope).is_ok());
        }

        /// Property: array digests are NULL only for no rows, concat digests
        /// whenever every pair is NULL
        #[test]
        fn prop_digest_nullness(rows in generators::arb_row_stamps(8)) {
            prop_assert_eq!(Dialect::ArrayAggregate.client_digest(&rows).is_none(), rows.is_empty());
            let all_null = rows.iter().all(|row| row.updated_at.is_none());
            prop_assert_eq!(Dialect::ConcatAggregate.client_digest(&rows).is_none(), all_null);
        }

        /// Property: invalid identifiers never pass as table names
        #[test]
        fn prop_invalid_identifier_rejected(table in generators::arb_invalid_identifier()) {
            let scope = ScopeSpec::new(table);
            assert_validation_error(&Dialect::ArrayAggregate.build_digest_sql(&scope));
        }
    }
}
