//! Redis waiting pool tests
//!
//! These run the claim and removal scripts against a real server and are
//! ignored by default. Start Redis, then:
//!
//!   REDIS_URL=redis://127.0.0.1:6379 cargo test --test redis_pool_tests -- --ignored

mod fixtures;

use fifo_matchmaker::pool::{ClaimOutcome, RedisWaitingPool, WaitingPool};
use fifo_matchmaker::types::PoolEntry;
use std::sync::Arc;

use fixtures::{create_test_processor, seed_pool, RecordingPublisher};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Pool on a fresh key so tests never see each other's players
async fn create_test_pool() -> RedisWaitingPool {
    let key = format!("test_player_pool:{}", uuid::Uuid::new_v4().simple());
    RedisWaitingPool::connect(&redis_url(), key)
        .await
        .expect("Redis must be running for ignored tests")
}

async fn drop_pool(pool: &RedisWaitingPool) {
    let client = redis::Client::open(redis_url()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let _: i64 = redis::cmd("DEL")
        .arg(pool.pool_key())
        .query_async(&mut conn)
        .await
        .unwrap();
}

async fn seeded(entries: &[(&str, i64)]) -> RedisWaitingPool {
    let pool = create_test_pool().await;
    for (id, rank) in entries {
        pool.enqueue(id, *rank).await.unwrap();
    }
    pool
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_peek_returns_oldest_with_ranks() {
    let pool = seeded(&[("c", 3_000), ("a", 1_000), ("b", 2_000)]).await;

    assert_eq!(
        pool.peek_oldest(2).await.unwrap(),
        vec![PoolEntry::new("a", 1_000), PoolEntry::new("b", 2_000)]
    );
    assert_eq!(pool.peek_oldest(usize::MAX).await.unwrap().len(), 3);
    assert_eq!(pool.rank_of("b").await.unwrap(), Some(2_000));
    assert_eq!(pool.rank_of("zz").await.unwrap(), None);

    // Re-enqueue moves the player to the back without duplicating it
    pool.enqueue("a", 4_000).await.unwrap();
    assert_eq!(pool.size().await.unwrap(), 3);
    assert_eq!(pool.peek_oldest(1).await.unwrap()[0].player_id, "b");

    drop_pool(&pool).await;
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_claim_takes_every_entry() {
    let pool = seeded(&[("a", 1), ("b", 2), ("c", 3)]).await;
    let snapshot = pool.peek_oldest(2).await.unwrap();

    assert_eq!(pool.claim(&snapshot).await.unwrap(), ClaimOutcome::Claimed);
    assert_eq!(
        pool.peek_oldest(10).await.unwrap(),
        vec![PoolEntry::new("c", 3)]
    );

    drop_pool(&pool).await;
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_claim_with_missing_member_takes_nothing() {
    let pool = seeded(&[("a", 1), ("b", 2), ("c", 3)]).await;
    let snapshot = pool.peek_oldest(3).await.unwrap();
    pool.remove_many(&["b".to_string()]).await.unwrap();

    let outcome = pool.claim(&snapshot).await.unwrap();

    assert_eq!(
        outcome,
        ClaimOutcome::Conflict {
            missing: vec!["b".to_string()]
        }
    );
    assert_eq!(
        pool.peek_oldest(10).await.unwrap(),
        vec![PoolEntry::new("a", 1), PoolEntry::new("c", 3)]
    );

    drop_pool(&pool).await;
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_claim_with_reranked_member_takes_nothing() {
    let pool = seeded(&[("a", 1), ("b", 2)]).await;
    let snapshot = pool.peek_oldest(2).await.unwrap();
    pool.enqueue("a", 99).await.unwrap();

    let outcome = pool.claim(&snapshot).await.unwrap();

    assert_eq!(
        outcome,
        ClaimOutcome::Conflict {
            missing: vec!["a".to_string()]
        }
    );
    assert_eq!(pool.size().await.unwrap(), 2);
    assert_eq!(pool.rank_of("a").await.unwrap(), Some(99));

    drop_pool(&pool).await;
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_remove_many_reports_only_present_ids() {
    let pool = seeded(&[("a", 1), ("b", 2)]).await;

    let removed = pool
        .remove_many(&["a".to_string(), "zz".to_string()])
        .await
        .unwrap();
    assert_eq!(removed, vec!["a".to_string()]);

    let removed = pool.remove_many(&["zz".to_string()]).await.unwrap();
    assert!(removed.is_empty());
    assert_eq!(pool.size().await.unwrap(), 1);

    drop_pool(&pool).await;
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_two_instances_race_for_one_snapshot() {
    let first = seeded(&[("p0", 1), ("p1", 2), ("p2", 3), ("p3", 4), ("p4", 5)]).await;
    let second = RedisWaitingPool::connect(&redis_url(), first.pool_key())
        .await
        .unwrap();

    let snapshot_a = first.peek_oldest(50).await.unwrap();
    let snapshot_b = second.peek_oldest(50).await.unwrap();
    assert_eq!(snapshot_a, snapshot_b);

    let (a, b) = tokio::join!(first.claim(&snapshot_a), second.claim(&snapshot_b));
    let outcomes = [a.unwrap(), b.unwrap()];

    assert_eq!(outcomes.iter().filter(|o| o.is_claimed()).count(), 1);
    assert_eq!(first.size().await.unwrap(), 0);

    drop_pool(&first).await;
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_drain_cycle_against_redis() {
    let pool = Arc::new(create_test_pool().await);
    seed_pool(pool.as_ref(), "p", 20).await;
    let publisher = Arc::new(RecordingPublisher::new());

    create_test_processor(pool.clone(), publisher.clone())
        .drain()
        .await
        .unwrap();

    assert_eq!(publisher.match_sizes(), vec![9, 11]);
    assert_eq!(pool.size().await.unwrap(), 0);

    drop_pool(&pool).await;
}
