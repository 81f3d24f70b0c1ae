//! Waiting pool access contract
//!
//! The pool is an ordered set of waiting player ids keyed by enqueue rank and
//! shared by every intake and worker instance. Matchmaking only talks to it
//! through [`WaitingPool`], so any store that offers these primitives can back
//! the service.

pub mod memory;
pub mod redis_pool;

pub use memory::InMemoryWaitingPool;
pub use redis_pool::RedisWaitingPool;

use crate::error::{MatchmakingError, Result};
use crate::types::{EnqueueRank, PlayerId, PoolEntry};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, error, warn};

/// Result of trying to take a set of entries out of the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Every entry was present and unchanged, and all of them were removed
    Claimed,
    /// Some entries were already gone (or re-ranked); nothing was taken
    Conflict { missing: Vec<PlayerId> },
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed)
    }
}

/// Operations matchmaking needs from the shared pool store
///
/// Storage failures surface as [`crate::error::MatchmakingError::PoolUnavailable`]
/// so callers can treat them as retryable.
#[async_trait]
pub trait WaitingPool: Send + Sync {
    /// Insert a player, or move it to `rank` if it is already waiting
    async fn enqueue(&self, player_id: &str, rank: EnqueueRank) -> Result<()>;

    /// Up to `n` oldest entries in ascending rank order, without removing them
    async fn peek_oldest(&self, n: usize) -> Result<Vec<PoolEntry>>;

    /// Remove the given players if present. Returns the ids this call actually removed.
    async fn remove_many(&self, player_ids: &[PlayerId]) -> Result<Vec<PlayerId>>;

    /// Number of distinct waiting players
    async fn size(&self) -> Result<usize>;

    /// Current rank of a waiting player, or `None` if it is not in the pool
    async fn rank_of(&self, player_id: &str) -> Result<Option<EnqueueRank>>;

    /// Take all of `entries` out of the pool, or none of them.
    ///
    /// An entry only counts as present when its rank still matches the
    /// snapshot it was read with. Stores with server-side transactions should
    /// override this with a single atomic operation. The default is an
    /// optimistic protocol: ranks are checked with [`WaitingPool::rank_of`],
    /// then the players are taken with [`WaitingPool::remove_many`]. If
    /// another worker got to some of them first, the ones this call removed
    /// are put back with their original rank.
    ///
    /// A re-enqueue that lands between the rank check and the removal is not
    /// seen by the default; only an atomic override closes that window.
    async fn claim(&self, entries: &[PoolEntry]) -> Result<ClaimOutcome> {
        if entries.is_empty() {
            return Ok(ClaimOutcome::Claimed);
        }

        let mut stale = Vec::new();
        for entry in entries {
            if self.rank_of(&entry.player_id).await? != Some(entry.rank) {
                stale.push(entry.player_id.clone());
            }
        }
        if !stale.is_empty() {
            debug!(
                "Claim conflict - {} of {} players gone or re-ranked",
                stale.len(),
                entries.len()
            );
            return Ok(ClaimOutcome::Conflict { missing: stale });
        }

        let ids: Vec<PlayerId> = entries.iter().map(|e| e.player_id.clone()).collect();
        let removed = self.remove_many(&ids).await?;

        if removed.len() == entries.len() {
            return Ok(ClaimOutcome::Claimed);
        }

        let removed: HashSet<&str> = removed.iter().map(String::as_str).collect();
        let missing: Vec<PlayerId> = entries
            .iter()
            .filter(|e| !removed.contains(e.player_id.as_str()))
            .map(|e| e.player_id.clone())
            .collect();

        warn!(
            "Claim conflict - {} of {} players already taken, restoring {}",
            missing.len(),
            entries.len(),
            removed.len()
        );

        let mut unrestored = Vec::new();
        for entry in entries
            .iter()
            .filter(|e| removed.contains(e.player_id.as_str()))
        {
            if let Err(e) = self.enqueue(&entry.player_id, entry.rank).await {
                error!(
                    "Failed to restore player '{}' (rank {}) after claim conflict: {:#}",
                    entry.player_id, entry.rank, e
                );
                unrestored.push(entry.player_id.clone());
            }
        }

        if !unrestored.is_empty() {
            return Err(MatchmakingError::InternalError {
                message: format!(
                    "Players dropped from the pool after claim conflict: {}",
                    unrestored.join(", ")
                ),
            }
            .into());
        }

        Ok(ClaimOutcome::Conflict { missing })
    }
}
