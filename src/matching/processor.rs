//! Drain cycle: read the oldest waiting players in batches, form matches and
//! commit each one by claiming its players from the pool.
//!
//! A match is only emitted after its claim succeeded, so a player can never
//! end up in two matches even when several workers drain the same pool. When
//! a claim conflicts, the rest of the batch's decisions are dropped and the
//! batch is read again.

use crate::amqp::publisher::MatchPublisher;
use crate::error::Result;
use crate::matching::formation::{form_pending_matches, DEFAULT_BATCH_SIZE, MIN_PLAYERS};
use crate::metrics::{MetricsCollector, MetricsTimer};
use crate::pool::{ClaimOutcome, WaitingPool};
use crate::types::Match;
use crate::utils::millis;
use anyhow::Context;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for the batch processor
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Entries read from the pool per batch
    pub batch_size: usize,
    /// Consecutive conflicting batches tolerated before the cycle gives up
    pub max_commit_retries: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_commit_retries: 3,
        }
    }
}

/// Why a drain cycle stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Fewer than the minimum players were waiting
    BelowMinimum,
    /// The last batch was partial, so the pool has been read to the end
    Exhausted,
    /// Other workers kept taking the same players; left for the next trigger
    ConflictLimit,
}

impl DrainOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrainOutcome::BelowMinimum => "below_minimum",
            DrainOutcome::Exhausted => "exhausted",
            DrainOutcome::ConflictLimit => "conflict_limit",
        }
    }
}

/// Summary of one drain cycle
#[derive(Debug, Clone)]
pub struct DrainReport {
    pub outcome: DrainOutcome,
    pub batches: usize,
    pub conflicts: usize,
    /// Committed matches in commit order
    pub matches: Vec<Match>,
}

impl DrainReport {
    fn new() -> Self {
        Self {
            outcome: DrainOutcome::BelowMinimum,
            batches: 0,
            conflicts: 0,
            matches: Vec::new(),
        }
    }

    pub fn players_matched(&self) -> usize {
        self.matches.iter().map(|m| m.players.len()).sum()
    }
}

/// Runs drain cycles against a shared waiting pool
pub struct BatchProcessor {
    pool: Arc<dyn WaitingPool>,
    publisher: Arc<dyn MatchPublisher>,
    metrics: Option<Arc<MetricsCollector>>,
    config: ProcessorConfig,
}

impl BatchProcessor {
    pub fn new(
        pool: Arc<dyn WaitingPool>,
        publisher: Arc<dyn MatchPublisher>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            pool,
            publisher,
            metrics: None,
            config,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one drain cycle to completion.
    ///
    /// Storage errors abort the cycle; matches committed before the failure
    /// stay committed and everything else stays in the pool.
    pub async fn drain(&self) -> Result<DrainReport> {
        let start_time = Instant::now();
        let result = self.run_cycle().await;
        let elapsed = start_time.elapsed();

        match &result {
            Ok(report) => {
                info!(
                    "Drain cycle finished ({}) - matches: {}, players: {}, batches: {}, conflicts: {}, time: {:.2}ms",
                    report.outcome.as_str(),
                    report.matches.len(),
                    report.players_matched(),
                    report.batches,
                    report.conflicts,
                    millis(elapsed)
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_drain_cycle(report.outcome.as_str(), elapsed);
                }
                self.refresh_pool_size().await;
            }
            Err(e) => {
                warn!(
                    "Drain cycle aborted after {:.2}ms: {:#}",
                    millis(elapsed),
                    e
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_drain_cycle("error", elapsed);
                }
            }
        }

        result
    }

    async fn run_cycle(&self) -> Result<DrainReport> {
        let mut report = DrainReport::new();
        let mut consecutive_conflicts: u32 = 0;

        loop {
            let timer = MetricsTimer::start();
            let candidates = self
                .pool
                .peek_oldest(self.config.batch_size)
                .await
                .context("Failed to read oldest waiting players")?;
            self.record_operation("peek", timer);

            report.batches += 1;
            if let Some(metrics) = &self.metrics {
                metrics.record_batch();
            }

            if candidates.len() < MIN_PLAYERS {
                debug!(
                    "Batch {} has {} candidate(s), below minimum of {}",
                    report.batches,
                    candidates.len(),
                    MIN_PLAYERS
                );
                report.outcome = if report.matches.is_empty() {
                    DrainOutcome::BelowMinimum
                } else {
                    DrainOutcome::Exhausted
                };
                return Ok(report);
            }

            let (pending, leftover) = form_pending_matches(&candidates);
            debug!(
                "Batch {} - {} candidates, {} matches decided, {} leftover",
                report.batches,
                candidates.len(),
                pending.len(),
                leftover.len()
            );

            let mut conflicted = false;
            for decided in pending {
                let timer = MetricsTimer::start();
                let outcome = self
                    .pool
                    .claim(&decided.entries)
                    .await
                    .with_context(|| {
                        format!("Failed to commit match {}", decided.r#match.match_id)
                    })?;
                self.record_operation("claim", timer);

                match outcome {
                    ClaimOutcome::Claimed => {
                        self.emit(&decided.r#match).await;
                        report.matches.push(decided.r#match);
                    }
                    ClaimOutcome::Conflict { missing } => {
                        warn!(
                            "Commit conflict on match {} - {} player(s) taken concurrently: {:?}",
                            decided.r#match.match_id,
                            missing.len(),
                            missing
                        );
                        report.conflicts += 1;
                        if let Some(metrics) = &self.metrics {
                            metrics.record_commit_conflict();
                        }
                        conflicted = true;
                        break;
                    }
                }
            }

            if conflicted {
                consecutive_conflicts += 1;
                if consecutive_conflicts >= self.config.max_commit_retries {
                    warn!(
                        "Giving up after {} consecutive conflicting batches",
                        consecutive_conflicts
                    );
                    report.outcome = DrainOutcome::ConflictLimit;
                    return Ok(report);
                }
                continue;
            }
            consecutive_conflicts = 0;

            if candidates.len() < self.config.batch_size {
                report.outcome = DrainOutcome::Exhausted;
                return Ok(report);
            }
        }
    }

    fn record_operation(&self, operation: &str, timer: MetricsTimer) {
        if let Some(metrics) = &self.metrics {
            metrics.record_operation(operation, timer.stop());
        }
    }

    /// Record and publish a committed match. Publish failures are only logged.
    async fn emit(&self, formed: &Match) {
        if let Some(metrics) = &self.metrics {
            metrics.record_match_formed(formed.players.len());
        }

        let published = self.publisher.publish_match(formed).await;
        if let Err(e) = &published {
            warn!("Failed to publish match {}: {}", formed.match_id, e);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_match_published(published.is_ok());
        }
    }

    async fn refresh_pool_size(&self) {
        match self.pool.size().await {
            Ok(size) => {
                if let Some(metrics) = &self.metrics {
                    metrics.update_pool_size(size);
                }
            }
            Err(e) => warn!("Failed to read pool size after drain: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockMatchPublisher;
    use crate::error::MatchmakingError;
    use crate::pool::InMemoryWaitingPool;
    use crate::types::{EnqueueRank, PlayerId, PoolEntry};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn accepting_publisher(times: usize) -> Arc<MockMatchPublisher> {
        let mut publisher = MockMatchPublisher::new();
        publisher
            .expect_publish_match()
            .times(times)
            .returning(|_| Ok(()));
        Arc::new(publisher)
    }

    async fn create_test_pool(count: usize) -> Arc<InMemoryWaitingPool> {
        let pool = Arc::new(InMemoryWaitingPool::new());
        for i in 0..count {
            pool.enqueue(&format!("p{:03}", i), 1_000 + i as EnqueueRank)
                .await
                .unwrap();
        }
        pool
    }

    fn create_test_processor(
        pool: Arc<dyn WaitingPool>,
        publisher: Arc<dyn MatchPublisher>,
        batch_size: usize,
    ) -> BatchProcessor {
        BatchProcessor::new(
            pool,
            publisher,
            ProcessorConfig {
                batch_size,
                max_commit_retries: 3,
            },
        )
    }

    fn sizes(report: &DrainReport) -> Vec<usize> {
        report.matches.iter().map(|m| m.players.len()).collect()
    }

    #[tokio::test]
    async fn test_drain_small_pool() {
        let pool = create_test_pool(3).await;
        let processor = create_test_processor(pool.clone(), accepting_publisher(1), 50);

        let report = processor.drain().await.unwrap();

        assert_eq!(sizes(&report), vec![3]);
        assert_eq!(report.outcome, DrainOutcome::Exhausted);
        assert_eq!(pool.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drain_below_minimum_is_noop() {
        let pool = create_test_pool(1).await;
        let processor = create_test_processor(pool.clone(), accepting_publisher(0), 50);

        let report = processor.drain().await.unwrap();

        assert!(report.matches.is_empty());
        assert_eq!(report.outcome, DrainOutcome::BelowMinimum);
        assert!(pool.contains("p000"));
    }

    #[tokio::test]
    async fn test_full_batches_loop_and_keep_leftover() {
        // 11 players, batches of 5: 5 -> [5], 5 -> [5], 1 -> stop
        let pool = create_test_pool(11).await;
        let processor = create_test_processor(pool.clone(), accepting_publisher(2), 5);

        let report = processor.drain().await.unwrap();

        assert_eq!(sizes(&report), vec![5, 5]);
        assert_eq!(report.batches, 3);
        assert_eq!(report.outcome, DrainOutcome::Exhausted);
        assert!(pool.contains("p010"));
        assert_eq!(pool.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_first_match_is_oldest_players() {
        let pool = create_test_pool(30).await;
        let processor = create_test_processor(pool.clone(), accepting_publisher(3), 50);

        let report = processor.drain().await.unwrap();

        assert_eq!(sizes(&report), vec![12, 9, 9]);
        let expected: Vec<String> = (0..12).map(|i| format!("p{:03}", i)).collect();
        assert_eq!(report.matches[0].player_ids(), expected);
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_commit() {
        let pool = create_test_pool(4).await;
        let mut publisher = MockMatchPublisher::new();
        publisher.expect_publish_match().times(1).returning(|_| {
            Err(MatchmakingError::BusUnavailable {
                message: "broker gone".to_string(),
            }
            .into())
        });
        let processor = create_test_processor(pool.clone(), Arc::new(publisher), 50);

        let report = processor.drain().await.unwrap();

        assert_eq!(report.matches.len(), 1);
        assert_eq!(pool.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_metrics_recorded() {
        let pool = create_test_pool(20).await;
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let processor = create_test_processor(pool.clone(), accepting_publisher(2), 50)
            .with_metrics(metrics.clone());

        processor.drain().await.unwrap();

        assert_eq!(metrics.matches().matches_formed_total.get(), 2);
        assert_eq!(metrics.matches().players_matched_total.get(), 20);
        assert_eq!(metrics.matches().pool_size.get(), 0);
    }

    /// Pool whose claims always lose to another worker
    struct ContendedPool {
        inner: InMemoryWaitingPool,
        claims: AtomicUsize,
    }

    #[async_trait]
    impl WaitingPool for ContendedPool {
        async fn enqueue(&self, player_id: &str, rank: EnqueueRank) -> Result<()> {
            self.inner.enqueue(player_id, rank).await
        }

        async fn peek_oldest(&self, n: usize) -> Result<Vec<PoolEntry>> {
            self.inner.peek_oldest(n).await
        }

        async fn remove_many(&self, player_ids: &[PlayerId]) -> Result<Vec<PlayerId>> {
            self.inner.remove_many(player_ids).await
        }

        async fn size(&self) -> Result<usize> {
            self.inner.size().await
        }

        async fn rank_of(&self, player_id: &str) -> Result<Option<EnqueueRank>> {
            self.inner.rank_of(player_id).await
        }

        async fn claim(&self, entries: &[PoolEntry]) -> Result<ClaimOutcome> {
            self.claims.fetch_add(1, Ordering::SeqCst);
            Ok(ClaimOutcome::Conflict {
                missing: vec![entries[0].player_id.clone()],
            })
        }
    }

    #[tokio::test]
    async fn test_conflict_limit_stops_cycle_without_removing() {
        let pool = Arc::new(ContendedPool {
            inner: InMemoryWaitingPool::new(),
            claims: AtomicUsize::new(0),
        });
        for i in 0..4 {
            pool.enqueue(&format!("p{}", i), i).await.unwrap();
        }
        let processor = create_test_processor(pool.clone(), accepting_publisher(0), 50);

        let report = processor.drain().await.unwrap();

        assert_eq!(report.outcome, DrainOutcome::ConflictLimit);
        assert_eq!(report.conflicts, 3);
        assert_eq!(pool.claims.load(Ordering::SeqCst), 3);
        assert_eq!(pool.size().await.unwrap(), 4);
    }

    /// Pool that loses one player to a competing worker after the first peek
    struct RacedPool {
        inner: InMemoryWaitingPool,
        peeks: AtomicUsize,
    }

    #[async_trait]
    impl WaitingPool for RacedPool {
        async fn enqueue(&self, player_id: &str, rank: EnqueueRank) -> Result<()> {
            self.inner.enqueue(player_id, rank).await
        }

        async fn peek_oldest(&self, n: usize) -> Result<Vec<PoolEntry>> {
            let snapshot = self.inner.peek_oldest(n).await?;
            if self.peeks.fetch_add(1, Ordering::SeqCst) == 0 {
                self.inner.remove_many(&["p1".to_string()]).await?;
            }
            Ok(snapshot)
        }

        async fn remove_many(&self, player_ids: &[PlayerId]) -> Result<Vec<PlayerId>> {
            self.inner.remove_many(player_ids).await
        }

        async fn size(&self) -> Result<usize> {
            self.inner.size().await
        }

        async fn rank_of(&self, player_id: &str) -> Result<Option<EnqueueRank>> {
            self.inner.rank_of(player_id).await
        }

        async fn claim(&self, entries: &[PoolEntry]) -> Result<ClaimOutcome> {
            self.inner.claim(entries).await
        }
    }

    #[tokio::test]
    async fn test_conflict_rereads_and_excludes_taken_player() {
        let pool = Arc::new(RacedPool {
            inner: InMemoryWaitingPool::new(),
            peeks: AtomicUsize::new(0),
        });
        for i in 0..5 {
            pool.enqueue(&format!("p{}", i), i).await.unwrap();
        }
        let processor = create_test_processor(pool.clone(), accepting_publisher(1), 50);

        let report = processor.drain().await.unwrap();

        assert_eq!(report.conflicts, 1);
        assert_eq!(report.matches.len(), 1);
        let ids: HashSet<&str> = report.matches[0].player_ids().into_iter().collect();
        assert_eq!(ids, HashSet::from(["p0", "p2", "p3", "p4"]));
        assert_eq!(pool.size().await.unwrap(), 0);
    }

    /// Pool whose store is unreachable
    struct FailingPool;

    #[async_trait]
    impl WaitingPool for FailingPool {
        async fn enqueue(&self, _player_id: &str, _rank: EnqueueRank) -> Result<()> {
            Err(unavailable())
        }

        async fn peek_oldest(&self, _n: usize) -> Result<Vec<PoolEntry>> {
            Err(unavailable())
        }

        async fn remove_many(&self, _player_ids: &[PlayerId]) -> Result<Vec<PlayerId>> {
            Err(unavailable())
        }

        async fn size(&self) -> Result<usize> {
            Err(unavailable())
        }

        async fn rank_of(&self, _player_id: &str) -> Result<Option<EnqueueRank>> {
            Err(unavailable())
        }
    }

    fn unavailable() -> anyhow::Error {
        MatchmakingError::PoolUnavailable {
            message: "connection refused".to_string(),
        }
        .into()
    }

    #[tokio::test]
    async fn test_storage_error_is_retryable() {
        let processor = create_test_processor(Arc::new(FailingPool), accepting_publisher(0), 50);

        let error = processor.drain().await.unwrap_err();

        assert!(MatchmakingError::is_retryable_error(&error));
    }
}
