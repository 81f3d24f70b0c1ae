//! Process-local waiting pool
//!
//! Keeps the same ordering and set semantics as the Redis sorted set: one
//! entry per player, ascending rank, ties broken by player id.

use crate::error::{MatchmakingError, Result};
use crate::pool::{ClaimOutcome, WaitingPool};
use crate::types::{EnqueueRank, PlayerId, PoolEntry};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct PoolState {
    ranks: HashMap<PlayerId, EnqueueRank>,
    ordered: BTreeSet<(EnqueueRank, PlayerId)>,
}

impl PoolState {
    fn insert(&mut self, player_id: &str, rank: EnqueueRank) {
        if let Some(previous) = self.ranks.insert(player_id.to_string(), rank) {
            self.ordered.remove(&(previous, player_id.to_string()));
        }
        self.ordered.insert((rank, player_id.to_string()));
    }

    fn remove(&mut self, player_id: &str) -> bool {
        match self.ranks.remove(player_id) {
            Some(rank) => {
                self.ordered.remove(&(rank, player_id.to_string()));
                true
            }
            None => false,
        }
    }
}

/// In-memory pool for single-process deployments and tests
#[derive(Debug, Default)]
pub struct InMemoryWaitingPool {
    state: Mutex<PoolState>,
}

impl InMemoryWaitingPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolState>> {
        self.state.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire waiting pool lock".to_string(),
            }
            .into()
        })
    }

    /// Whether a player is currently waiting
    pub fn contains(&self, player_id: &str) -> bool {
        self.lock()
            .map(|state| state.ranks.contains_key(player_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl WaitingPool for InMemoryWaitingPool {
    async fn enqueue(&self, player_id: &str, rank: EnqueueRank) -> Result<()> {
        self.lock()?.insert(player_id, rank);
        Ok(())
    }

    async fn peek_oldest(&self, n: usize) -> Result<Vec<PoolEntry>> {
        let state = self.lock()?;
        Ok(state
            .ordered
            .iter()
            .take(n)
            .map(|(rank, id)| PoolEntry::new(id.clone(), *rank))
            .collect())
    }

    async fn remove_many(&self, player_ids: &[PlayerId]) -> Result<Vec<PlayerId>> {
        let mut state = self.lock()?;
        Ok(player_ids
            .iter()
            .filter(|id| state.remove(id))
            .cloned()
            .collect())
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.lock()?.ranks.len())
    }

    async fn rank_of(&self, player_id: &str) -> Result<Option<EnqueueRank>> {
        Ok(self.lock()?.ranks.get(player_id).copied())
    }

    async fn claim(&self, entries: &[PoolEntry]) -> Result<ClaimOutcome> {
        let mut state = self.lock()?;

        let missing: Vec<PlayerId> = entries
            .iter()
            .filter(|e| state.ranks.get(&e.player_id) != Some(&e.rank))
            .map(|e| e.player_id.clone())
            .collect();

        if !missing.is_empty() {
            return Ok(ClaimOutcome::Conflict { missing });
        }

        for entry in entries {
            state.remove(&entry.player_id);
        }
        Ok(ClaimOutcome::Claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_peek_is_ordered_and_non_destructive() {
        let pool = InMemoryWaitingPool::new();
        pool.enqueue("late", 30).await.unwrap();
        pool.enqueue("early", 10).await.unwrap();
        pool.enqueue("middle", 20).await.unwrap();

        let peeked = pool.peek_oldest(2).await.unwrap();
        assert_eq!(
            peeked,
            vec![PoolEntry::new("early", 10), PoolEntry::new("middle", 20)]
        );
        assert_eq!(pool.size().await.unwrap(), 3);

        // Asking for more than available returns what is there
        assert_eq!(pool.peek_oldest(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent_and_updates_rank() {
        let pool = InMemoryWaitingPool::new();
        pool.enqueue("p1", 10).await.unwrap();
        pool.enqueue("p2", 20).await.unwrap();
        pool.enqueue("p1", 30).await.unwrap();

        assert_eq!(pool.size().await.unwrap(), 2);
        let peeked = pool.peek_oldest(5).await.unwrap();
        assert_eq!(
            peeked,
            vec![PoolEntry::new("p2", 20), PoolEntry::new("p1", 30)]
        );
        assert_eq!(pool.rank_of("p1").await.unwrap(), Some(30));
        assert_eq!(pool.rank_of("p3").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_many_ignores_absent_ids() {
        let pool = InMemoryWaitingPool::new();
        pool.enqueue("p1", 1).await.unwrap();
        pool.enqueue("p2", 2).await.unwrap();

        let removed = pool
            .remove_many(&["p1".to_string(), "ghost".to_string()])
            .await
            .unwrap();

        assert_eq!(removed, vec!["p1".to_string()]);
        assert!(!pool.contains("p1"));
        assert!(pool.contains("p2"));
    }

    #[tokio::test]
    async fn test_claim_is_all_or_nothing() {
        let pool = InMemoryWaitingPool::new();
        pool.enqueue("a", 1).await.unwrap();
        pool.enqueue("b", 2).await.unwrap();
        let snapshot = pool.peek_oldest(2).await.unwrap();

        pool.remove_many(&["a".to_string()]).await.unwrap();

        let outcome = pool.claim(&snapshot).await.unwrap();
        assert_eq!(
            outcome,
            ClaimOutcome::Conflict {
                missing: vec!["a".to_string()]
            }
        );
        assert!(pool.contains("b"));
    }

    #[tokio::test]
    async fn test_claim_detects_rerank() {
        let pool = InMemoryWaitingPool::new();
        pool.enqueue("a", 1).await.unwrap();
        pool.enqueue("b", 2).await.unwrap();
        let snapshot = pool.peek_oldest(2).await.unwrap();

        pool.enqueue("a", 5).await.unwrap();

        let outcome = pool.claim(&snapshot).await.unwrap();
        assert!(!outcome.is_claimed());
        assert_eq!(pool.size().await.unwrap(), 2);
    }
}
