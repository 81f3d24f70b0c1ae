//! FIFO match formation
//!
//! Splits an ordered run of waiting players into match-sized groups. The
//! functions here are pure: no I/O, no failure, and the output depends only
//! on the input order (plus the generated match ids and timestamps).

use crate::types::{Match, Player, PoolEntry};
use crate::utils::{current_timestamp, generate_match_id};

/// Smallest group that forms a match
pub const MIN_PLAYERS: usize = 2;

/// Largest group formed in one step when the remainder is small enough to take whole
pub const MAX_PLAYERS: usize = 16;

/// Default number of entries read from the pool per batch
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Group size for the next match given how many players remain.
///
/// Thresholds are checked top-down (`<= 16`, `>= 24`, `>= 18`), so a
/// remainder of exactly 17 falls through and is taken whole.
pub fn optimal_group_size(remaining: usize) -> usize {
    if remaining <= MAX_PLAYERS {
        remaining
    } else if remaining >= 24 {
        12
    } else if remaining >= 18 {
        9
    } else {
        remaining
    }
}

/// Sizes of the groups formed from `count` ordered players, in formation order
pub fn group_sizes(count: usize) -> Vec<usize> {
    let mut sizes = Vec::new();
    let mut remaining = count;

    while remaining >= MIN_PLAYERS {
        let size = optimal_group_size(remaining);
        sizes.push(size);
        remaining -= size;
    }

    sizes
}

/// Matches formed from a player sequence plus the players left waiting
#[derive(Debug, Clone)]
pub struct FormationResult {
    pub matches: Vec<Match>,
    /// Fewer than [`MIN_PLAYERS`] players, in original order
    pub leftover: Vec<Player>,
}

/// A match decided from pool entries but not yet claimed from the pool
#[derive(Debug, Clone)]
pub struct PendingMatch {
    /// Entries to claim, carrying the ranks they were read with
    pub entries: Vec<PoolEntry>,
    pub r#match: Match,
}

fn new_match(players: Vec<Player>) -> Match {
    Match {
        match_id: generate_match_id(),
        players,
        created_at: current_timestamp(),
    }
}

/// Partition an ordered player sequence into matches
pub fn form_matches(players: &[Player]) -> FormationResult {
    let mut matches = Vec::new();
    let mut offset = 0;

    for size in group_sizes(players.len()) {
        matches.push(new_match(players[offset..offset + size].to_vec()));
        offset += size;
    }

    FormationResult {
        matches,
        leftover: players[offset..].to_vec(),
    }
}

/// Same partitioning as [`form_matches`], keeping the pool entry of every
/// player so the match can be claimed against the snapshot it came from.
pub fn form_pending_matches(entries: &[PoolEntry]) -> (Vec<PendingMatch>, Vec<PoolEntry>) {
    let mut pending = Vec::new();
    let mut offset = 0;

    for size in group_sizes(entries.len()) {
        let group = entries[offset..offset + size].to_vec();
        let players = group.iter().map(PoolEntry::to_player).collect();
        pending.push(PendingMatch {
            entries: group,
            r#match: new_match(players),
        });
        offset += size;
    }

    (pending, entries[offset..].to_vec())
}
