//! Metrics and monitoring for the matchmaking service

pub mod collector;
pub mod health;

pub use collector::{
    DrainMetrics, IntakeMetrics, MatchMetrics, MetricsCollector, MetricsTimer, ServiceMetrics,
};
pub use health::{HealthServer, HealthServerConfig};
