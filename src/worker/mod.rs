//! Trigger-driven worker loop
//!
//! The worker sits `Idle` until a trigger arrives, then runs one drain cycle
//! (`Draining`) and goes back to `Idle`. Drains in one process never overlap;
//! concurrency comes from running several processes against the same pool.

use crate::amqp::messages::MessageUtils;
use crate::error::MatchmakingError;
use crate::matching::processor::{BatchProcessor, DrainReport};
use crate::metrics::MetricsCollector;
use crate::utils::millis;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Worker loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Draining,
}

/// How the delivery that caused a drain should be settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Drain completed (including "nothing to do"), or the failure will not go away on retry
    Acknowledge,
    /// Drain failed on a retryable error; redeliver the trigger
    Requeue,
}

impl TriggerDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerDecision::Acknowledge => "ack",
            TriggerDecision::Requeue => "requeue",
        }
    }
}

/// Counters kept by a worker
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    pub triggers_handled: u64,
    pub drains_failed: u64,
    pub matches_formed: u64,
    pub players_matched: u64,
}

/// Runs drain cycles in response to triggers
pub struct MatchmakeWorker {
    processor: Arc<BatchProcessor>,
    state: RwLock<WorkerState>,
    /// Held for the whole drain; waiting on it means waiting for `Idle`
    drain_lock: Mutex<()>,
    stats: RwLock<WorkerStats>,
    requeue_delay: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl MatchmakeWorker {
    pub fn new(processor: Arc<BatchProcessor>, requeue_delay: Duration) -> Self {
        Self {
            processor,
            state: RwLock::new(WorkerState::Idle),
            drain_lock: Mutex::new(()),
            stats: RwLock::new(WorkerStats::default()),
            requeue_delay,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    pub async fn stats(&self) -> WorkerStats {
        self.stats.read().await.clone()
    }

    /// Drain the pool in response to one trigger and decide how to settle it
    pub async fn handle_trigger(&self, content: &[u8]) -> TriggerDecision {
        let drain = self.drain_lock.lock().await;
        *self.state.write().await = WorkerState::Draining;

        debug!(
            "Trigger received ({}), draining pool",
            MessageUtils::describe_trigger(content)
        );

        let start_time = Instant::now();
        let result = self.processor.drain().await;
        *self.state.write().await = WorkerState::Idle;
        drop(drain);

        let decision = match result {
            Ok(report) => {
                self.record_success(&report).await;
                TriggerDecision::Acknowledge
            }
            Err(e) => {
                self.stats.write().await.drains_failed += 1;

                if MatchmakingError::is_retryable_error(&e) {
                    warn!(
                        "Drain failed after {:.2}ms, requeueing trigger in {:?}: {:#}",
                        millis(start_time.elapsed()),
                        self.requeue_delay,
                        e
                    );
                    tokio::time::sleep(self.requeue_delay).await;
                    TriggerDecision::Requeue
                } else {
                    error!(
                        "Drain failed with non-retryable error, dropping trigger: {:#}",
                        e
                    );
                    TriggerDecision::Acknowledge
                }
            }
        };

        self.stats.write().await.triggers_handled += 1;
        if let Some(metrics) = &self.metrics {
            metrics.record_trigger(decision.as_str());
        }
        decision
    }

    async fn record_success(&self, report: &DrainReport) {
        let mut stats = self.stats.write().await;
        stats.matches_formed += report.matches.len() as u64;
        stats.players_matched += report.players_matched() as u64;
    }

    /// Resolve once no drain is in progress
    pub async fn wait_idle(&self) {
        let _drain = self.drain_lock.lock().await;
    }

    /// Consume triggers from an in-process channel until it closes or shutdown fires
    pub async fn run_local(
        self: Arc<Self>,
        mut triggers: mpsc::Receiver<Vec<u8>>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Worker consuming local triggers");

        loop {
            let content = tokio::select! {
                _ = shutdown.recv() => break,
                received = triggers.recv() => match received {
                    Some(content) => content,
                    None => break,
                },
            };

            // A local trigger has no broker to redeliver it, so retry in place
            let mut decision = self.handle_trigger(&content).await;
            while decision == TriggerDecision::Requeue {
                if !matches!(shutdown.try_recv(), Err(TryRecvError::Empty)) {
                    info!("Shutdown during trigger retry, abandoning trigger");
                    return;
                }
                decision = self.handle_trigger(&content).await;
            }
        }

        info!("Worker stopped consuming local triggers");
    }
}
