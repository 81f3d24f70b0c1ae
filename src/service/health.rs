//! Health checks for readiness and liveness probes

use crate::amqp::connection::AmqpConnection;
use crate::config::ServiceRole;
use crate::pool::WaitingPool;
use crate::worker::{MatchmakeWorker, WorkerState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::debug;

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value exported to Prometheus
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn combine(self, other: HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Handles to everything a health probe inspects
#[derive(Clone)]
pub struct HealthContext {
    pub service_name: String,
    pub role: ServiceRole,
    pub started_at: Instant,
    pub is_running: Arc<RwLock<bool>>,
    pub pool: Arc<dyn WaitingPool>,
    pub amqp: Option<Arc<AmqpConnection>>,
    pub worker: Option<Arc<MatchmakeWorker>>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl ComponentCheck {
    fn new(name: &str, start: Instant, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub role: String,
    /// Players currently waiting, if the pool answered
    pub pool_size: Option<usize>,
    pub worker_state: Option<String>,
    pub triggers_handled: u64,
    pub matches_formed: u64,
    pub players_matched: u64,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(context: &HealthContext) -> Self {
        let mut checks = vec![
            Self::check_service_running(context).await,
            Self::check_pool(context).await,
        ];
        if let Some(check) = Self::check_amqp(context) {
            checks.push(check);
        }

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.combine(check.status));

        HealthCheck {
            status,
            service: context.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats: Self::gather_service_stats(context).await,
        }
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(context: &HealthContext) -> HealthStatus {
        if *context.is_running.read().await {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    /// Readiness check - running, and the pool and bus are reachable
    pub async fn readiness_check(context: &HealthContext) -> HealthStatus {
        if !*context.is_running.read().await {
            return HealthStatus::Unhealthy;
        }

        let mut status = Self::check_pool(context).await.status;
        if let Some(amqp) = Self::check_amqp(context) {
            status = status.combine(amqp.status);
        }
        status
    }

    async fn check_service_running(context: &HealthContext) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if *context.is_running.read().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck::new("service_running", start, status, message)
    }

    async fn check_pool(context: &HealthContext) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match context.pool.size().await {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => (
                HealthStatus::Unhealthy,
                Some(format!("Waiting pool unreachable: {}", e)),
            ),
        };

        ComponentCheck::new("waiting_pool", start, status, message)
    }

    fn check_amqp(context: &HealthContext) -> Option<ComponentCheck> {
        let amqp = context.amqp.as_ref()?;
        let start = Instant::now();

        let (status, message) = if amqp.is_alive() {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("AMQP connection closed".to_string()),
            )
        };

        Some(ComponentCheck::new("amqp_connection", start, status, message))
    }

    async fn gather_service_stats(context: &HealthContext) -> ServiceStats {
        let pool_size = match context.pool.size().await {
            Ok(size) => Some(size),
            Err(e) => {
                debug!("Failed to read pool size for stats: {}", e);
                None
            }
        };

        let mut stats = ServiceStats {
            role: context.role.to_string(),
            pool_size,
            uptime_seconds: context.started_at.elapsed().as_secs(),
            ..ServiceStats::default()
        };

        if let Some(worker) = &context.worker {
            let worker_stats = worker.stats().await;
            stats.worker_state = Some(match worker.state().await {
                WorkerState::Idle => "idle".to_string(),
                WorkerState::Draining => "draining".to_string(),
            });
            stats.triggers_handled = worker_stats.triggers_handled;
            stats.matches_formed = worker_stats.matches_formed;
            stats.players_matched = worker_stats.players_matched;
        }

        stats
    }
}
