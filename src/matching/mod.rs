//! Match formation and the drain cycle that commits it

pub mod formation;
pub mod processor;

pub use formation::{
    form_matches, form_pending_matches, optimal_group_size, FormationResult, PendingMatch,
    DEFAULT_BATCH_SIZE, MAX_PLAYERS, MIN_PLAYERS,
};
pub use processor::{BatchProcessor, DrainOutcome, DrainReport, ProcessorConfig};
