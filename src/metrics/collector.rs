//! Metrics collection using Prometheus
//!
//! All series are prefixed `fifo_matchmaker_` and registered on one registry
//! that the health server exposes on `/metrics`.

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    service_metrics: ServiceMetrics,
    intake_metrics: IntakeMetrics,
    drain_metrics: DrainMetrics,
    match_metrics: MatchMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// AMQP operations by kind and status
    pub amqp_messages_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Intake endpoint metrics
#[derive(Clone)]
pub struct IntakeMetrics {
    /// Match requests by response status
    pub requests_total: IntCounterVec,

    /// Time to enqueue and publish the trigger
    pub request_duration: Histogram,
}

/// Trigger and drain cycle metrics
#[derive(Clone)]
pub struct DrainMetrics {
    /// Trigger deliveries by outcome (ack, requeue, dropped)
    pub triggers_total: IntCounterVec,

    /// Completed drain cycles by outcome
    pub drain_cycles_total: IntCounterVec,

    /// Batches read from the pool
    pub batches_total: IntCounter,

    /// Claims rejected because the pool changed underneath
    pub commit_conflicts_total: IntCounter,

    /// Wall time of one drain cycle
    pub drain_duration: Histogram,
}

/// Match output metrics
#[derive(Clone)]
pub struct MatchMetrics {
    pub matches_formed_total: IntCounter,
    pub players_matched_total: IntCounter,

    /// Players per committed match
    pub match_size: Histogram,

    /// Last observed number of waiting players
    pub pool_size: IntGauge,

    /// Match event publish attempts by status
    pub match_publish_total: IntCounterVec,

    pub operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let intake_metrics = IntakeMetrics::new(&registry)?;
        let drain_metrics = DrainMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            intake_metrics,
            drain_metrics,
            match_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn intake(&self) -> &IntakeMetrics {
        &self.intake_metrics
    }

    pub fn drain(&self) -> &DrainMetrics {
        &self.drain_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    /// Record one intake request and its handling time
    pub fn record_intake_request(&self, status: &str, duration: Duration) {
        self.intake_metrics
            .requests_total
            .with_label_values(&[status])
            .inc();
        self.intake_metrics
            .request_duration
            .observe(duration.as_secs_f64());
    }

    /// Record how a trigger delivery was settled
    pub fn record_trigger(&self, outcome: &str) {
        self.drain_metrics
            .triggers_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record a finished (or aborted) drain cycle
    pub fn record_drain_cycle(&self, outcome: &str, duration: Duration) {
        self.drain_metrics
            .drain_cycles_total
            .with_label_values(&[outcome])
            .inc();
        self.drain_metrics
            .drain_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_batch(&self) {
        self.drain_metrics.batches_total.inc();
    }

    pub fn record_commit_conflict(&self) {
        self.drain_metrics.commit_conflicts_total.inc();
    }

    /// Record a committed match
    pub fn record_match_formed(&self, player_count: usize) {
        self.match_metrics.matches_formed_total.inc();
        self.match_metrics
            .players_matched_total
            .inc_by(player_count as u64);
        self.match_metrics.match_size.observe(player_count as f64);
    }

    pub fn record_match_published(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        self.match_metrics
            .match_publish_total
            .with_label_values(&[status])
            .inc();
    }

    pub fn update_pool_size(&self, size: usize) {
        self.match_metrics.pool_size.set(size as i64);
    }

    /// Record duration of a pool or bus operation
    pub fn record_operation(&self, operation: &str, duration: Duration) {
        self.match_metrics
            .operation_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    pub fn update_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::start()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("fifo_matchmaker_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "fifo_matchmaker_amqp_messages_total",
                "AMQP operations by kind and status",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let health_status = IntGauge::new(
            "fifo_matchmaker_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new(
                "fifo_matchmaker_component_health",
                "Component health status",
            ),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            health_status,
            component_health,
        })
    }
}

impl IntakeMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new(
                "fifo_matchmaker_intake_requests_total",
                "Match requests by response status",
            ),
            &["status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "fifo_matchmaker_intake_request_duration_seconds",
                "Match request handling time",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        Ok(Self {
            requests_total,
            request_duration,
        })
    }
}

impl DrainMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let triggers_total = IntCounterVec::new(
            Opts::new(
                "fifo_matchmaker_triggers_total",
                "Trigger deliveries by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(triggers_total.clone()))?;

        let drain_cycles_total = IntCounterVec::new(
            Opts::new(
                "fifo_matchmaker_drain_cycles_total",
                "Drain cycles by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(drain_cycles_total.clone()))?;

        let batches_total = IntCounter::new(
            "fifo_matchmaker_batches_total",
            "Batches read from the waiting pool",
        )?;
        registry.register(Box::new(batches_total.clone()))?;

        let commit_conflicts_total = IntCounter::new(
            "fifo_matchmaker_commit_conflicts_total",
            "Match claims rejected by concurrent pool changes",
        )?;
        registry.register(Box::new(commit_conflicts_total.clone()))?;

        let drain_duration = Histogram::with_opts(
            HistogramOpts::new(
                "fifo_matchmaker_drain_duration_seconds",
                "Drain cycle duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(drain_duration.clone()))?;

        Ok(Self {
            triggers_total,
            drain_cycles_total,
            batches_total,
            commit_conflicts_total,
            drain_duration,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let matches_formed_total = IntCounter::new(
            "fifo_matchmaker_matches_formed_total",
            "Committed matches",
        )?;
        registry.register(Box::new(matches_formed_total.clone()))?;

        let players_matched_total = IntCounter::new(
            "fifo_matchmaker_players_matched_total",
            "Players placed into committed matches",
        )?;
        registry.register(Box::new(players_matched_total.clone()))?;

        let match_size = Histogram::with_opts(
            HistogramOpts::new("fifo_matchmaker_match_size", "Players per match")
                .buckets(vec![2.0, 4.0, 8.0, 9.0, 12.0, 16.0, 17.0]),
        )?;
        registry.register(Box::new(match_size.clone()))?;

        let pool_size = IntGauge::new(
            "fifo_matchmaker_pool_size",
            "Players waiting in the pool",
        )?;
        registry.register(Box::new(pool_size.clone()))?;

        let match_publish_total = IntCounterVec::new(
            Opts::new(
                "fifo_matchmaker_match_publish_total",
                "Match event publish attempts",
            ),
            &["status"],
        )?;
        registry.register(Box::new(match_publish_total.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "fifo_matchmaker_operation_duration_seconds",
                "Pool and bus operation duration",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            matches_formed_total,
            players_matched_total,
            match_size,
            pool_size,
            match_publish_total,
            operation_duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        let _service = collector.service();
        let _intake = collector.intake();
        let _drain = collector.drain();
        let _matches = collector.matches();
    }

    #[test]
    fn test_match_recording() {
        let collector = MetricsCollector::new().unwrap();

        collector.record_match_formed(12);
        collector.record_match_formed(9);

        assert_eq!(collector.matches().matches_formed_total.get(), 2);
        assert_eq!(collector.matches().players_matched_total.get(), 21);
        assert_eq!(collector.matches().match_size.get_sample_count(), 2);
    }

    #[test]
    fn test_drain_recording() {
        let collector = MetricsCollector::new().unwrap();

        collector.record_batch();
        collector.record_commit_conflict();
        collector.record_trigger("ack");
        collector.record_drain_cycle("drained", Duration::from_millis(3));

        assert_eq!(collector.drain().batches_total.get(), 1);
        assert_eq!(collector.drain().commit_conflicts_total.get(), 1);
        assert_eq!(
            collector
                .drain()
                .triggers_total
                .with_label_values(&["ack"])
                .get(),
            1
        );
    }

    #[test]
    fn test_intake_and_gauges() {
        let collector = MetricsCollector::new().unwrap();

        collector.record_intake_request("200", Duration::from_millis(2));
        collector.update_pool_size(7);
        collector.update_health_status(2);
        collector.update_component_health("waiting_pool", true);

        assert_eq!(collector.matches().pool_size.get(), 7);
        assert_eq!(collector.service().health_status.get(), 2);
    }

    #[test]
    fn test_registry_exports_prefixed_series() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_match_formed(3);

        let families = collector.registry().gather();
        assert!(families
            .iter()
            .all(|f| f.get_name().starts_with("fifo_matchmaker_")));
    }

    #[test]
    fn test_metrics_timer() {
        let collector = MetricsCollector::new().unwrap();
        let timer = collector.start_timer();

        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.stop() >= Duration::from_millis(10));
    }
}
