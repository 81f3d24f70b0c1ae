//! Redis-backed waiting pool
//!
//! Redis keys
//! ----------
//! `<pool_key>` - ZSET, member = player id, score = enqueue rank (ms since epoch)
//!
//! Multi-member removals run as Lua scripts so every claim is atomic on the
//! server, whichever worker instance issues it.

use crate::error::{MatchmakingError, Result};
use crate::pool::{ClaimOutcome, WaitingPool};
use crate::types::{EnqueueRank, PlayerId, PoolEntry};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError, Script};
use tracing::{debug, info};

/// Removes every listed member and returns the ones that were present.
const REMOVE_MANY_SCRIPT: &str = r#"
local removed = {}
for i = 1, #ARGV do
    if redis.call('ZREM', KEYS[1], ARGV[i]) == 1 then
        table.insert(removed, ARGV[i])
    end
end
return removed
"#;

/// ARGV holds (member, rank) pairs. Removes all of them only if each is
/// present with the given rank; otherwise removes nothing and returns the
/// members that were missing or re-ranked.
const CLAIM_SCRIPT: &str = r#"
local missing = {}
for i = 1, #ARGV, 2 do
    local score = redis.call('ZSCORE', KEYS[1], ARGV[i])
    if (not score) or tonumber(score) ~= tonumber(ARGV[i + 1]) then
        table.insert(missing, ARGV[i])
    end
end
if #missing > 0 then
    return missing
end
for i = 1, #ARGV, 2 do
    redis.call('ZREM', KEYS[1], ARGV[i])
end
return missing
"#;

fn pool_error(operation: &str, error: RedisError) -> anyhow::Error {
    MatchmakingError::PoolUnavailable {
        message: format!("{} failed: {}", operation, error),
    }
    .into()
}

/// Inclusive ZRANGE stop index for the first `n` members; -1 means "to the end"
fn range_stop(n: usize) -> isize {
    isize::try_from(n).map_or(-1, |n| n - 1)
}

/// Waiting pool stored in a Redis sorted set shared by all instances
#[derive(Clone)]
pub struct RedisWaitingPool {
    connection: MultiplexedConnection,
    pool_key: String,
    remove_script: Script,
    claim_script: Script,
}

impl RedisWaitingPool {
    /// Connect to Redis and verify the server answers
    pub async fn connect(redis_url: &str, pool_key: impl Into<String>) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| pool_error("Redis client setup", e))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| pool_error("Redis connect", e))?;

        let pool = Self {
            connection,
            pool_key: pool_key.into(),
            remove_script: Script::new(REMOVE_MANY_SCRIPT),
            claim_script: Script::new(CLAIM_SCRIPT),
        };
        pool.ping().await?;

        info!(
            "Connected to Redis waiting pool at {} (key '{}')",
            redis_url, pool.pool_key
        );
        Ok(pool)
    }

    /// Round-trip to the server, used by health checks
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| pool_error("PING", e))?;
        Ok(())
    }

    pub fn pool_key(&self) -> &str {
        &self.pool_key
    }
}

#[async_trait]
impl WaitingPool for RedisWaitingPool {
    async fn enqueue(&self, player_id: &str, rank: EnqueueRank) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .zadd(&self.pool_key, player_id, rank)
            .await
            .map_err(|e| pool_error("ZADD", e))?;
        Ok(())
    }

    async fn peek_oldest(&self, n: usize) -> Result<Vec<PoolEntry>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.connection.clone();
        let members: Vec<(String, f64)> = conn
            .zrange_withscores(&self.pool_key, 0, range_stop(n))
            .await
            .map_err(|e| pool_error("ZRANGE", e))?;

        Ok(members
            .into_iter()
            .map(|(player_id, score)| PoolEntry::new(player_id, score as EnqueueRank))
            .collect())
    }

    async fn remove_many(&self, player_ids: &[PlayerId]) -> Result<Vec<PlayerId>> {
        if player_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection.clone();
        let mut invocation = self.remove_script.prepare_invoke();
        invocation.key(&self.pool_key);
        for player_id in player_ids {
            invocation.arg(player_id);
        }

        let removed: Vec<PlayerId> = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| pool_error("remove script", e))?;

        debug!(
            "Removed {}/{} players from '{}'",
            removed.len(),
            player_ids.len(),
            self.pool_key
        );
        Ok(removed)
    }

    async fn size(&self) -> Result<usize> {
        let mut conn = self.connection.clone();
        conn.zcard(&self.pool_key)
            .await
            .map_err(|e| pool_error("ZCARD", e))
    }

    async fn rank_of(&self, player_id: &str) -> Result<Option<EnqueueRank>> {
        let mut conn = self.connection.clone();
        let score: Option<f64> = conn
            .zscore(&self.pool_key, player_id)
            .await
            .map_err(|e| pool_error("ZSCORE", e))?;
        Ok(score.map(|score| score as EnqueueRank))
    }

    async fn claim(&self, entries: &[PoolEntry]) -> Result<ClaimOutcome> {
        if entries.is_empty() {
            return Ok(ClaimOutcome::Claimed);
        }

        let mut conn = self.connection.clone();
        let mut invocation = self.claim_script.prepare_invoke();
        invocation.key(&self.pool_key);
        for entry in entries {
            invocation.arg(&entry.player_id).arg(entry.rank);
        }

        let missing: Vec<PlayerId> = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| pool_error("claim script", e))?;

        if missing.is_empty() {
            Ok(ClaimOutcome::Claimed)
        } else {
            Ok(ClaimOutcome::Conflict { missing })
        }
    }
}
