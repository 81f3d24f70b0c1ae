//! Test fixtures and instrumented pools for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use fifo_matchmaker::amqp::publisher::MatchPublisher;
use fifo_matchmaker::error::Result;
use fifo_matchmaker::matching::{BatchProcessor, ProcessorConfig};
use fifo_matchmaker::pool::{ClaimOutcome, InMemoryWaitingPool, WaitingPool};
use fifo_matchmaker::types::{EnqueueRank, Match, PlayerId, PoolEntry};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Barrier;

/// Match publisher that keeps every match it receives
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<Match>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matches(&self) -> Vec<Match> {
        self.published
            .lock()
            .map(|matches| matches.clone())
            .unwrap_or_default()
    }

    pub fn match_sizes(&self) -> Vec<usize> {
        self.matches().iter().map(|m| m.players.len()).collect()
    }

    /// Every player id published, in publication order
    pub fn matched_player_ids(&self) -> Vec<PlayerId> {
        self.matches()
            .iter()
            .flat_map(|m| m.players.iter().map(|p| p.id.clone()))
            .collect()
    }
}

#[async_trait]
impl MatchPublisher for RecordingPublisher {
    async fn publish_match(&self, formed: &Match) -> Result<()> {
        if let Ok(mut published) = self.published.lock() {
            published.push(formed.clone());
        }
        Ok(())
    }
}

/// Pool whose first `parties` peeks wait for each other, so that concurrent
/// drains all read the same snapshot before any of them commits
pub struct LockstepPool {
    inner: InMemoryWaitingPool,
    barrier: Barrier,
    parties: usize,
    peeks: AtomicUsize,
}

impl LockstepPool {
    pub fn new(inner: InMemoryWaitingPool, parties: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(parties),
            parties,
            peeks: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &InMemoryWaitingPool {
        &self.inner
    }
}

#[async_trait]
impl WaitingPool for LockstepPool {
    async fn enqueue(&self, player_id: &str, rank: EnqueueRank) -> Result<()> {
        self.inner.enqueue(player_id, rank).await
    }

    async fn peek_oldest(&self, n: usize) -> Result<Vec<PoolEntry>> {
        let snapshot = self.inner.peek_oldest(n).await?;
        if self.peeks.fetch_add(1, Ordering::SeqCst) < self.parties {
            self.barrier.wait().await;
        }
        Ok(snapshot)
    }

    async fn remove_many(&self, player_ids: &[PlayerId]) -> Result<Vec<PlayerId>> {
        self.inner.remove_many(player_ids).await
    }

    async fn size(&self) -> Result<usize> {
        self.inner.size().await
    }

    async fn rank_of(&self, player_id: &str) -> Result<Option<EnqueueRank>> {
        self.inner.rank_of(player_id).await
    }

    async fn claim(&self, entries: &[PoolEntry]) -> Result<ClaimOutcome> {
        self.inner.claim(entries).await
    }
}

/// Ids used by [`seed_pool`], oldest first
pub fn player_ids(prefix: &str, count: usize) -> Vec<PlayerId> {
    (0..count).map(|i| format!("{}{:03}", prefix, i)).collect()
}

/// Add `count` players with strictly increasing ranks and return their ids
pub async fn seed_pool(pool: &dyn WaitingPool, prefix: &str, count: usize) -> Vec<PlayerId> {
    let ids = player_ids(prefix, count);
    for (i, id) in ids.iter().enumerate() {
        pool.enqueue(id, 1_000 + i as EnqueueRank)
            .await
            .expect("seeding the pool");
    }
    ids
}

pub fn create_test_processor(
    pool: Arc<dyn WaitingPool>,
    publisher: Arc<RecordingPublisher>,
) -> BatchProcessor {
    BatchProcessor::new(pool, publisher, ProcessorConfig::default())
}

/// Remaining pool members, oldest first
pub async fn remaining_ids(pool: &dyn WaitingPool) -> Vec<PlayerId> {
    pool.peek_oldest(usize::MAX)
        .await
        .expect("reading the pool")
        .into_iter()
        .map(|entry| entry.player_id)
        .collect()
}

/// Panic if any player shows up twice; return the distinct set
pub fn assert_no_duplicates(ids: &[PlayerId]) -> HashSet<PlayerId> {
    let mut seen = HashSet::new();
    for id in ids {
        assert!(seen.insert(id.clone()), "player {} matched twice", id);
    }
    seen
}
