//! `PgStore` against a real database.
//!
//! Run with `DATABASE_URL` pointing at a disposable PostgreSQL database.
//! Every test works on its own random variant id, so tests can share it.

use std::collections::HashSet;
use std::sync::Arc;

use activation_key_service::{
    db,
    services::allocation_service::{self, AllocationError, RetryPolicy},
    store::{
        Claim, ClaimOutcome, KeyFilter, KeyQuery, KeyStore, MemoryStore, PgStore, SortColumn,
        SortDirection, StoreError,
    },
};
use uuid::Uuid;

mod common;
use common::*;

async fn store() -> PgStore {
    let url = std::env::var("DATABASE_URL").unwrap();
    let pool = db::create_pool(&url, 10).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    PgStore::new(pool)
}

fn unique(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

#[tokio::test]
async fn test_pg_allocation_order_and_replay() {
    skip_without_env!("DATABASE_URL");
    let store = store().await;
    let variant = unique("variant");
    let k1 = unique("K1");
    let k2 = unique("K2");
    seed_keys(&store, &variant, &[k1.as_str(), k2.as_str()]).await;
    let policy = fast_policy();

    let a = allocation_service::allocate(&store, &policy, &variant, "order_A")
        .await
        .unwrap();
    assert_eq!(a.key().key_value, k1);
    assert!(!a.is_replay());

    let replay = allocation_service::allocate(&store, &policy, &variant, "order_A")
        .await
        .unwrap();
    assert!(replay.is_replay());
    assert_eq!(replay.key().id, a.key().id);

    let b = allocation_service::allocate(&store, &policy, &variant, "order_B")
        .await
        .unwrap();
    assert_eq!(b.key().key_value, k2);

    let c = allocation_service::allocate(&store, &policy, &variant, "order_C").await;
    assert!(matches!(c, Err(AllocationError::NoKeyAvailable { .. })));

    let stock = store.stock(&variant).await.unwrap();
    assert_eq!((stock.available, stock.used), (0, 2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_concurrent_allocation_never_double_assigns() {
    skip_without_env!("DATABASE_URL");
    const KEYS: usize = 5;
    const ORDERS: usize = 20;

    let store = Arc::new(store().await);
    let variant = unique("variant");
    let values: Vec<String> = (0..KEYS).map(|i| unique(&format!("KEY{i}"))).collect();
    let refs: Vec<&str> = values.iter().map(String::as_str).collect();
    seed_keys(&*store, &variant, &refs).await;

    let mut handles = Vec::new();
    for i in 0..ORDERS {
        let store = store.clone();
        let variant = variant.clone();
        handles.push(tokio::spawn(async move {
            // Generous budget: SKIP LOCKED may report contention while peers commit
            let policy = RetryPolicy {
                max_attempts: 50,
                ..fast_policy()
            };
            allocation_service::allocate(&*store, &policy, &variant, &format!("order_{i}"))
                .await
        }));
    }

    let mut issued = HashSet::new();
    let mut exhausted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(allocation) => assert!(issued.insert(allocation.key().id)),
            Err(AllocationError::NoKeyAvailable { .. }) => exhausted += 1,
            Err(e) => panic!("unexpected allocation error: {e}"),
        }
    }

    assert_eq!(issued.len(), KEYS);
    assert_eq!(exhausted, ORDERS - KEYS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_racing_replays_consume_one_key() {
    skip_without_env!("DATABASE_URL");
    let store = Arc::new(store().await);
    let variant = unique("variant");
    let values: Vec<String> = (0..4).map(|i| unique(&format!("KEY{i}"))).collect();
    let refs: Vec<&str> = values.iter().map(String::as_str).collect();
    seed_keys(&*store, &variant, &refs).await;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let store = store.clone();
        let variant = variant.clone();
        handles.push(tokio::spawn(async move {
            let claim = Claim {
                variant_id: &variant,
                order_id: "order_A",
                slot: 0,
            };
            store.claim_key(&claim).await
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            ClaimOutcome::Claimed(key) | ClaimOutcome::Existing(key) => {
                ids.insert(key.id);
            }
            // Lost the race before the winner committed; a retry would replay
            ClaimOutcome::Contended => {}
            ClaimOutcome::Exhausted => panic!("pool cannot be exhausted here"),
        }
    }

    assert_eq!(ids.len(), 1);
    assert_eq!(store.stock(&variant).await.unwrap().used, 1);
}

#[tokio::test]
async fn test_pg_duplicate_in_batch_stores_nothing() {
    skip_without_env!("DATABASE_URL");
    let store = store().await;
    let variant = unique("variant");
    let existing = unique("EXISTING");
    seed_keys(&store, &variant, &[existing.as_str()]).await;

    let err = store
        .insert_keys(vec![new_key(&unique("NEW"), &variant), new_key(&existing, &variant)])
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::DuplicateKey(_)));
    assert_eq!(store.stock(&variant).await.unwrap().available, 1);
}

#[tokio::test]
async fn test_pg_delete_rules() {
    skip_without_env!("DATABASE_URL");
    let store = store().await;
    let variant = unique("variant");
    let values = [unique("A"), unique("B")];
    let keys = seed_keys(&store, &variant, &[values[0].as_str(), values[1].as_str()]).await;

    // Oldest key gets allocated
    allocation_service::allocate(&store, &fast_policy(), &variant, "order_A")
        .await
        .unwrap();

    let err = store.delete_available_key(keys[0].id).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyUsed));

    store.delete_available_key(keys[1].id).await.unwrap();
    assert!(store.get_key(keys[1].id).await.unwrap().is_none());

    let err = store.delete_available_key(keys[1].id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound));

    // The deleted value can be provisioned again
    seed_keys(&store, &variant, &[values[1].as_str()]).await;
}

#[tokio::test]
async fn test_pg_listing_filters_and_pages() {
    skip_without_env!("DATABASE_URL");
    let store = store().await;
    let variant = unique("variant");
    let values: Vec<String> = ["C", "A", "B"].iter().map(|p| format!("{p}-{variant}")).collect();
    let refs: Vec<&str> = values.iter().map(String::as_str).collect();
    seed_keys(&store, &variant, &refs).await;

    let page = store
        .list_keys(&KeyQuery {
            filter: KeyFilter {
                variant_id: Some(variant.clone()),
                ..KeyFilter::default()
            },
            sort: SortColumn::KeyValue,
            direction: SortDirection::Asc,
            limit: 2,
            offset: 1,
        })
        .await
        .unwrap();

    assert_eq!(page.total, 3);
    let listed: Vec<&str> = page.keys.iter().map(|k| k.key_value.as_str()).collect();
    assert_eq!(listed, vec![values[2].as_str(), values[0].as_str()]);

    let search = store
        .list_keys(&KeyQuery {
            filter: KeyFilter {
                search: Some(format!("a-{}", variant.to_uppercase())),
                ..KeyFilter::default()
            },
            ..KeyQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(search.total, 1);
}

#[tokio::test]
async fn test_pg_search_treats_wildcards_literally() {
    skip_without_env!("DATABASE_URL");
    let store = store().await;
    let variant = unique("variant");
    let underscored = format!("A_B-{variant}");
    let plain = format!("AXB-{variant}");
    seed_keys(&store, &variant, &[underscored.as_str(), plain.as_str()]).await;

    let search = |q: String| KeyQuery {
        filter: KeyFilter {
            variant_id: Some(variant.clone()),
            search: Some(q),
            ..KeyFilter::default()
        },
        ..KeyQuery::default()
    };

    let page = store.list_keys(&search("a_b".to_string())).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.keys[0].key_value, underscored);

    let page = store.list_keys(&search("%".to_string())).await.unwrap();
    assert_eq!(page.total, 0);

    // Same answers from the in-memory store
    let memory = MemoryStore::new();
    seed_keys(&memory, &variant, &[underscored.as_str(), plain.as_str()]).await;
    assert_eq!(memory.list_keys(&search("a_b".to_string())).await.unwrap().total, 1);
    assert_eq!(memory.list_keys(&search("%".to_string())).await.unwrap().total, 0);
}
