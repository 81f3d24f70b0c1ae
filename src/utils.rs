//! Utility functions for the matchmaking service

use crate::types::{EnqueueRank, MatchId};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new globally unique match ID
pub fn generate_match_id() -> MatchId {
    format!("match_{}", Uuid::new_v4().simple())
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Rank for a player entering the pool now
pub fn current_rank() -> EnqueueRank {
    Utc::now().timestamp_millis()
}

/// Format a duration in milliseconds for log output
pub fn millis(duration: std::time::Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_ids() {
        let id1 = generate_match_id();
        let id2 = generate_match_id();
        assert_ne!(id1, id2);
        assert!(id1.starts_with("match_"));
    }

    #[test]
    fn test_rank_is_non_decreasing() {
        let first = current_rank();
        let second = current_rank();
        assert!(second >= first);
    }
}
