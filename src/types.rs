//! Common types used throughout the matchmaking service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for players
pub type PlayerId = String;

/// Unique identifier for matches
pub type MatchId = String;

/// Ordering key of a waiting player (enqueue time in milliseconds since the Unix epoch)
pub type EnqueueRank = i64;

/// Player information for matchmaking
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    /// Reported latency in milliseconds. Informational only, never used for grouping.
    #[serde(default)]
    pub ping: i64,
}

impl Player {
    pub fn new(id: impl Into<PlayerId>) -> Self {
        Self {
            id: id.into(),
            ping: 0,
        }
    }
}

/// One waiting player as stored in the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    pub player_id: PlayerId,
    pub rank: EnqueueRank,
}

impl PoolEntry {
    pub fn new(player_id: impl Into<PlayerId>, rank: EnqueueRank) -> Self {
        Self {
            player_id: player_id.into(),
            rank,
        }
    }

    /// Rebuild the player record. Latency is not persisted in the pool, so ping is zero.
    pub fn to_player(&self) -> Player {
        Player::new(self.player_id.clone())
    }
}

/// Request body accepted by the intake endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRequest {
    pub player: Player,
}

/// A formed match. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub match_id: MatchId,
    pub players: Vec<Player>,
    pub created_at: DateTime<Utc>,
}

impl Match {
    pub fn player_ids(&self) -> Vec<&str> {
        self.players.iter().map(|p| p.id.as_str()).collect()
    }
}

/// Event emitted when a match has been committed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFormed {
    #[serde(flatten)]
    pub r#match: Match,
    pub player_count: usize,
}

impl From<Match> for MatchFormed {
    fn from(m: Match) -> Self {
        Self {
            player_count: m.players.len(),
            r#match: m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_ping_defaults_to_zero() {
        let request: MatchRequest = serde_json::from_str(r#"{"player": {"id": "p1"}}"#).unwrap();
        assert_eq!(request.player.id, "p1");
        assert_eq!(request.player.ping, 0);
    }

    #[test]
    fn test_pool_entry_to_player() {
        let entry = PoolEntry::new("p7", 1_700_000_000_000);
        let player = entry.to_player();
        assert_eq!(player.id, "p7");
        assert_eq!(player.ping, 0);
    }

    #[test]
    fn test_match_formed_wire_shape() {
        let m = Match {
            match_id: "match_1".to_string(),
            players: vec![Player::new("a"), Player::new("b")],
            created_at: Utc::now(),
        };
        let event = MatchFormed::from(m);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["match_id"], "match_1");
        assert_eq!(value["player_count"], 2);
        assert_eq!(value["players"][1]["id"], "b");
    }
}
