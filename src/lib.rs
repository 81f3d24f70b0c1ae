//! FIFO Matchmaker - pool-draining matchmaking service
//!
//! Players are queued in a shared waiting pool ordered by arrival. Each
//! matchmaking trigger makes one worker drain the oldest players into
//! matches of 2 to 16 players, committing every match atomically so that
//! concurrent workers never place a player twice.

pub mod amqp;
pub mod config;
pub mod error;
pub mod intake;
pub mod matching;
pub mod metrics;
pub mod pool;
pub mod service;
pub mod types;
pub mod utils;
pub mod worker;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::{MatchPublisher, TriggerPublisher};
pub use matching::{BatchProcessor, DrainOutcome, DrainReport};
pub use pool::{ClaimOutcome, InMemoryWaitingPool, RedisWaitingPool, WaitingPool};
pub use worker::{MatchmakeWorker, TriggerDecision};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
