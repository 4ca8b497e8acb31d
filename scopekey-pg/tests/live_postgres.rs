//! Digest queries against a live PostgreSQL server.
//!
//! Run with `cargo test -p scopekey-pg -- --ignored` and the `SCOPEKEY_DB_*`
//! variables pointing at a scratch database. Each test owns its table.

use chrono::NaiveDateTime;
use scopekey_core::{array_digest, join_fragments, Dialect, RecordKey, RowStamp};
use scopekey_pg::PgConnection;
use scopekey_storage::{Fragment, KeyCache, KeyCacheConfig, ScopeKeys, ScopeSpec};
use scopekey_test_utils::assertions::{assert_digest_key, assert_empty_key};
use scopekey_test_utils::init_tracing;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Create `table` and run `seed` against it.
async fn setup(table: &str, seed: &str) -> PgConnection {
    init_tracing();
    let conn = PgConnection::from_env().unwrap();
    let client = conn.pool().get().await.unwrap();
    client
        .batch_execute(&format!(
            "DROP TABLE IF EXISTS {table};
             CREATE TABLE {table} (
                 id bigserial PRIMARY KEY,
                 post_id bigint NOT NULL,
                 body text NOT NULL DEFAULT '',
                 updated_at timestamp(6) NOT NULL DEFAULT now()
             );
             {seed}",
            table = table,
            seed = seed.replace("{table}", table),
        ))
        .await
        .unwrap();
    conn
}

/// `(id, updated_at)` of every row, in primary key order, rendered the way
/// the server renders them.
async fn fetch_stamps(conn: &PgConnection, table: &str) -> Vec<RowStamp> {
    let client = conn.pool().get().await.unwrap();
    let rows = client
        .query(&format!("SELECT id, updated_at FROM {} ORDER BY id", table), &[])
        .await
        .unwrap();
    rows.iter()
        .map(|row| {
            let id: i64 = row.get("id");
            let updated_at: NaiveDateTime = row.get("updated_at");
            RowStamp::new(id, Dialect::ArrayAggregate.render_timestamp(updated_at))
        })
        .collect()
}

/// Load every full row and join their record keys.
async fn expand_record_keys(conn: &PgConnection, table: &str) -> String {
    let client = conn.pool().get().await.unwrap();
    let rows = client
        .query(&format!("SELECT * FROM {} ORDER BY id", table), &[])
        .await
        .unwrap();
    let keys: Vec<String> = rows
        .iter()
        .map(|row| {
            let id: i64 = row.get("id");
            let updated_at: NaiveDateTime = row.get("updated_at");
            RecordKey::new(table, id, updated_at.and_utc()).cache_key()
        })
        .collect();
    join_fragments(keys)
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn live_keys_follow_row_changes() {
    let table = "scopekey_live_changes";
    let conn = setup(table, "INSERT INTO {table} (post_id) VALUES (1), (1), (2);").await;
    let keys = ScopeKeys::uncached(Arc::new(conn.clone())).unwrap();
    let scope = ScopeSpec::new(table).filter(format!("{}.post_id = 1", table));

    let before = keys.cache_key(&scope).await.unwrap();
    assert_digest_key(&before, table);
    assert_eq!(keys.cache_key(&scope).await.unwrap(), before);

    let client = conn.pool().get().await.unwrap();
    client
        .execute(
            &format!(
                "UPDATE {} SET updated_at = updated_at + interval '1 second' WHERE post_id = 1",
                table
            ),
            &[],
        )
        .await
        .unwrap();

    let after = keys.cache_key(&scope).await.unwrap();
    assert_digest_key(&after, table);
    assert_ne!(after, before);
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn live_empty_and_paginated_scopes() {
    let table = "scopekey_live_pages";
    let conn = setup(table, "INSERT INTO {table} (post_id) VALUES (1), (1), (2);").await;
    let cache = KeyCache::in_memory(KeyCacheConfig::default()).unwrap();
    let keys = ScopeKeys::new(Arc::new(conn), cache).unwrap();

    let empty = ScopeSpec::new(table).filter("post_id = 42");
    assert_empty_key(&keys.cache_key(&empty).await.unwrap(), table);

    let full = ScopeSpec::new(table);
    let first_page = ScopeSpec::new(table).limit(2);
    let second_page = ScopeSpec::new(table).offset(2).limit(2);

    let full_key = keys.cache_key(&full).await.unwrap();
    let first_key = keys.cache_key(&first_page).await.unwrap();
    let second_key = keys.cache_key(&second_page).await.unwrap();
    assert_ne!(full_key, first_key);
    assert_ne!(first_key, second_key);

    let composed = keys
        .compose(&[Fragment::from("v1"), Fragment::scope(&full), Fragment::scope(&empty)])
        .await
        .unwrap();
    assert_eq!(composed, format!("v1/{}/{}/empty", full_key, table));
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn live_client_digest_matches_server() {
    let table = "scopekey_live_digest";
    let conn = setup(
        table,
        "INSERT INTO {table} (id, post_id, updated_at) VALUES
             (1, 1, '2024-01-01 00:00:01'),
             (2, 1, '2024-01-01 00:00:02.5'),
             (3, 2, '2024-01-01 00:00:03.123456'),
             (4, 2, '2024-01-01 00:00:04.010000');",
    )
    .await;
    let keys = ScopeKeys::uncached(Arc::new(conn.clone())).unwrap();

    let server = keys.digest(&ScopeSpec::new(table)).await.unwrap();
    let stamps = fetch_stamps(&conn, table).await;

    assert_eq!(stamps[0].pair().as_deref(), Some("1-2024-01-01 00:00:01"));
    assert_eq!(stamps[1].pair().as_deref(), Some("2-2024-01-01 00:00:02.5"));
    assert_eq!(server.value(), array_digest(&stamps).as_deref());
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn live_aggregate_beats_client_side_digests() {
    const ROWS: usize = 5_000;
    const ROUNDS: u32 = 10;

    let table = "scopekey_live_perf";
    let conn = setup(
        table,
        "INSERT INTO {table} (post_id, body, updated_at)
         SELECT g % 10, repeat('x', 200), timestamp '2024-01-01' + g * interval '1.25 second'
         FROM generate_series(1, 5000) AS g;",
    )
    .await;
    let keys = ScopeKeys::uncached(Arc::new(conn.clone())).unwrap();
    let scope = ScopeSpec::new(table);

    let server = keys.digest(&scope).await.unwrap();
    let stamps = fetch_stamps(&conn, table).await;
    assert_eq!(stamps.len(), ROWS);
    assert_eq!(server.value(), array_digest(&stamps).as_deref());

    let mut aggregate = Duration::ZERO;
    let mut client_digest = Duration::ZERO;
    let mut record_expansion = Duration::ZERO;

    for _ in 0..ROUNDS {
        let started = Instant::now();
        assert_digest_key(&keys.cache_key(&scope).await.unwrap(), table);
        aggregate += started.elapsed();

        let started = Instant::now();
        let stamps = fetch_stamps(&conn, table).await;
        assert!(array_digest(&stamps).is_some());
        client_digest += started.elapsed();

        let started = Instant::now();
        assert!(!expand_record_keys(&conn, table).await.is_empty());
        record_expansion += started.elapsed();
    }

    tracing::info!(
        ?aggregate,
        ?client_digest,
        ?record_expansion,
        rows = ROWS,
        rounds = ROUNDS,
        "Digest timings"
    );
    assert!(aggregate < client_digest, "{:?} >= {:?}", aggregate, client_digest);
    assert!(aggregate < record_expansion, "{:?} >= {:?}", aggregate, record_expansion);
}
