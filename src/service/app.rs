//! Main application state and service coordination
//!
//! `AppState` owns every long-lived component: the waiting pool, the AMQP
//! connection, the worker, the intake server and the health server. Which of
//! them exist depends on the configured role and pool backend.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::consumer::TriggerConsumer;
use crate::amqp::publisher::{
    AmqpMatchPublisher, AmqpTriggerPublisher, ChannelTriggerPublisher, LoggingMatchPublisher,
    MatchPublisher, PublisherConfig, TriggerPublisher,
};
use crate::config::{AppConfig, PoolBackend};
use crate::intake::{IntakeServer, IntakeState};
use crate::matching::processor::{BatchProcessor, ProcessorConfig};
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector};
use crate::pool::{InMemoryWaitingPool, RedisWaitingPool, WaitingPool};
use crate::service::health::{HealthCheck, HealthContext, HealthStatus};
use crate::worker::MatchmakeWorker;
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Capacity of the in-process trigger channel used with the memory backend
const LOCAL_TRIGGER_CAPACITY: usize = 1024;

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Waiting pool error: {message}")]
    Pool { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,
    metrics_collector: Arc<MetricsCollector>,
    pool: Arc<dyn WaitingPool>,
    amqp_connection: Option<Arc<AmqpConnection>>,
    worker: Option<Arc<MatchmakeWorker>>,
    trigger_publisher: Option<Arc<dyn TriggerPublisher>>,
    /// Receiving end of the local trigger bus, taken when the worker starts
    local_triggers: Option<mpsc::Receiver<Vec<u8>>>,
    health_server: Arc<HealthServer>,
    intake_server: Option<Arc<IntakeServer>>,
    trigger_consumer: Option<TriggerConsumer>,
    background_tasks: Vec<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
    started_at: Instant,
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing {} ({} role)", config.service.name, config.service.role);
        info!(
            "Configuration: pool_backend={:?}, pool_key={}, batch_size={}",
            config.pool.backend, config.pool.pool_key, config.matchmaking.batch_size
        );

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let pool = Self::initialize_pool(&config).await?;

        let amqp_connection = if Self::needs_amqp(&config) {
            Some(Self::initialize_amqp(&config).await?)
        } else {
            info!("Memory backend without match publishing, skipping AMQP");
            None
        };

        let worker = if config.service.role.runs_worker() {
            Some(
                Self::initialize_worker(
                    &config,
                    pool.clone(),
                    amqp_connection.as_deref(),
                    metrics_collector.clone(),
                )
                .await?,
            )
        } else {
            None
        };

        let (trigger_publisher, local_triggers) =
            Self::initialize_triggers(&config, amqp_connection.as_deref()).await?;

        let intake_server = match (&trigger_publisher, config.service.role.runs_intake()) {
            (Some(triggers), true) => {
                let state = IntakeState::new(pool.clone(), triggers.clone())
                    .with_metrics(metrics_collector.clone());
                Some(Arc::new(IntakeServer::new(config.service.http_port, state)))
            }
            _ => None,
        };

        let started_at = Instant::now();
        let is_running = Arc::new(RwLock::new(false));

        let health_context = HealthContext {
            service_name: config.service.name.clone(),
            role: config.service.role,
            started_at,
            is_running: is_running.clone(),
            pool: pool.clone(),
            amqp: amqp_connection.clone(),
            worker: worker.clone(),
        };
        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, metrics_collector.clone())
                .with_context(health_context),
        );

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            metrics_collector,
            pool,
            amqp_connection,
            worker,
            trigger_publisher,
            local_triggers,
            health_server,
            intake_server,
            trigger_consumer: None,
            background_tasks: Vec::new(),
            shutdown_tx,
            started_at,
            is_running,
        })
    }

    /// Start all background services and trigger consumption
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting {}", self.config.service.name);

        *self.is_running.write().await = true;

        self.start_health_server().await;
        self.start_worker().await?;
        self.start_intake_server().await;
        self.start_background_tasks();

        info!("✅ {} started successfully", self.config.service.name);
        Ok(())
    }

    /// Perform graceful shutdown
    ///
    /// New triggers stop first, then an in-flight drain is given up to the
    /// shutdown timeout to finish before everything else is torn down.
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of {}", self.config.service.name);

        *self.is_running.write().await = false;

        if let Some(consumer) = &self.trigger_consumer {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop trigger consumer: {}", e);
            } else {
                info!("✅ Trigger consumption stopped");
            }
        }
        if self.shutdown_tx.send(()).is_err() {
            debug!("No local worker listening for shutdown");
        }

        if let Some(worker) = &self.worker {
            let timeout = self.config.shutdown_timeout();
            match tokio::time::timeout(timeout, worker.wait_idle()).await {
                Ok(()) => info!("✅ Worker idle"),
                Err(_) => warn!(
                    "Worker still draining after {:?}, continuing shutdown",
                    timeout
                ),
            }
        }

        if let Some(intake) = &self.intake_server {
            intake.stop();
        }
        self.health_server.stop();

        self.stop_background_tasks().await;

        if let Some(worker) = &self.worker {
            let stats = worker.stats().await;
            info!("Final worker statistics: {:?}", stats);
        }

        info!("✅ {} shutdown completed", self.config.service.name);
        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn pool(&self) -> Arc<dyn WaitingPool> {
        self.pool.clone()
    }

    pub fn worker(&self) -> Option<Arc<MatchmakeWorker>> {
        self.worker.clone()
    }

    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    /// Get AMQP connection for health checks
    pub fn amqp_connection(&self) -> Option<Arc<AmqpConnection>> {
        self.amqp_connection.clone()
    }

    /// Handles inspected by health probes
    pub fn health_context(&self) -> HealthContext {
        HealthContext {
            service_name: self.config.service.name.clone(),
            role: self.config.service.role,
            started_at: self.started_at,
            is_running: self.is_running.clone(),
            pool: self.pool.clone(),
            amqp: self.amqp_connection.clone(),
            worker: self.worker.clone(),
        }
    }

    fn needs_amqp(config: &AppConfig) -> bool {
        config.pool.backend == PoolBackend::Redis || config.matchmaking.publish_matches
    }

    async fn initialize_pool(config: &AppConfig) -> Result<Arc<dyn WaitingPool>, ServiceError> {
        match config.pool.backend {
            PoolBackend::Redis => {
                info!("Connecting to Redis pool at {}", config.pool.redis_url);
                let pool = RedisWaitingPool::connect(&config.pool.redis_url, &config.pool.pool_key)
                    .await
                    .map_err(|e| ServiceError::Pool {
                        message: format!("Failed to connect to Redis: {:#}", e),
                    })?;
                Ok(Arc::new(pool))
            }
            PoolBackend::Memory => {
                warn!("Using the in-memory waiting pool; state is lost on restart");
                Ok(Arc::new(InMemoryWaitingPool::new()))
            }
        }
    }

    /// Initialize AMQP connection with retry logic
    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        let amqp_config = AmqpConfig::from_url(&config.amqp.url)
            .map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {:#}", e),
            })?
            .with_retry(
                config.amqp.max_retry_attempts,
                config.amqp.retry_delay_ms,
                config.amqp_connection_timeout(),
            );

        info!(
            "Connecting to AMQP broker at {}:{}",
            amqp_config.host, amqp_config.port
        );

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {:#}", e),
                })?;
        debug!("AMQP vhost '{}'", connection.config().vhost);

        Ok(Arc::new(connection))
    }

    fn publisher_config(config: &AppConfig) -> PublisherConfig {
        PublisherConfig {
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
        }
    }

    async fn initialize_worker(
        config: &AppConfig,
        pool: Arc<dyn WaitingPool>,
        amqp_connection: Option<&AmqpConnection>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Result<Arc<MatchmakeWorker>, ServiceError> {
        let publisher: Arc<dyn MatchPublisher> = match amqp_connection {
            Some(connection) if config.matchmaking.publish_matches => {
                let channel = connection.open_channel().await.map_err(|e| {
                    ServiceError::AmqpConnection {
                        message: format!("Failed to open publisher channel: {:#}", e),
                    }
                })?;
                let publisher = AmqpMatchPublisher::new(
                    channel,
                    &config.amqp.match_exchange,
                    Self::publisher_config(config),
                )
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to initialize match publisher: {:#}", e),
                })?;
                info!(
                    "Publishing formed matches to exchange '{}'",
                    config.amqp.match_exchange
                );
                Arc::new(publisher)
            }
            _ => Arc::new(LoggingMatchPublisher),
        };

        let processor_config = ProcessorConfig {
            batch_size: config.matchmaking.batch_size,
            max_commit_retries: config.matchmaking.max_commit_retries,
        };
        let processor = BatchProcessor::new(pool, publisher, processor_config)
            .with_metrics(metrics_collector.clone());

        let worker = MatchmakeWorker::new(Arc::new(processor), config.requeue_delay())
            .with_metrics(metrics_collector);

        Ok(Arc::new(worker))
    }

    /// Pick the trigger bus: the AMQP work queue for the shared pool, an
    /// in-process channel for the memory pool
    async fn initialize_triggers(
        config: &AppConfig,
        amqp_connection: Option<&AmqpConnection>,
    ) -> Result<(Option<Arc<dyn TriggerPublisher>>, Option<mpsc::Receiver<Vec<u8>>>), ServiceError>
    {
        match config.pool.backend {
            PoolBackend::Memory => {
                let (publisher, receiver) = ChannelTriggerPublisher::channel(LOCAL_TRIGGER_CAPACITY);
                Ok((Some(Arc::new(publisher)), Some(receiver)))
            }
            PoolBackend::Redis if config.service.role.runs_intake() => {
                let connection = amqp_connection.ok_or_else(|| ServiceError::Initialization {
                    message: "Trigger publishing requires an AMQP connection".to_string(),
                })?;
                let channel = connection.open_channel().await.map_err(|e| {
                    ServiceError::AmqpConnection {
                        message: format!("Failed to open trigger channel: {:#}", e),
                    }
                })?;
                let publisher = AmqpTriggerPublisher::new(
                    channel,
                    &config.amqp.trigger_queue,
                    Self::publisher_config(config),
                )
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to initialize trigger publisher: {:#}", e),
                })?;
                Ok((Some(Arc::new(publisher)), None))
            }
            PoolBackend::Redis => Ok((None, None)),
        }
    }

    async fn start_health_server(&mut self) {
        info!("Starting metrics and health endpoints");

        let health_server = self.health_server.clone();
        let port = self.config.service.health_port;

        let handle = tokio::spawn(async move {
            if let Err(e) = health_server.start().await {
                error!("Health server failed: {:#}", e);
            }
        });
        self.background_tasks.push(handle);

        // Give the server a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;
        info!("✅ Health server started on port {}", port);
    }

    async fn start_worker(&mut self) -> Result<(), ServiceError> {
        let Some(worker) = self.worker.clone() else {
            info!("Worker disabled for {} role", self.config.service.role);
            return Ok(());
        };

        if let Some(triggers) = self.local_triggers.take() {
            info!("Starting worker on the in-process trigger bus");
            let shutdown = self.shutdown_tx.subscribe();
            self.background_tasks
                .push(tokio::spawn(worker.run_local(triggers, shutdown)));
            return Ok(());
        }

        let connection = self
            .amqp_connection
            .as_ref()
            .ok_or_else(|| ServiceError::Initialization {
                message: "Worker requires an AMQP connection for triggers".to_string(),
            })?;
        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {:#}", e),
            })?;

        let consumer =
            TriggerConsumer::new(worker, channel).with_metrics(self.metrics_collector.clone());
        consumer
            .start_consuming(
                &self.config.amqp.trigger_queue,
                self.config.amqp.prefetch_count,
            )
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming triggers: {:#}", e),
            })?;

        info!(
            "✅ Worker consuming triggers from '{}' (prefetch {})",
            self.config.amqp.trigger_queue, self.config.amqp.prefetch_count
        );
        self.trigger_consumer = Some(consumer);
        Ok(())
    }

    async fn start_intake_server(&mut self) {
        let Some(intake) = self.intake_server.clone() else {
            return;
        };

        let handle = tokio::spawn(async move {
            if let Err(e) = intake.start().await {
                error!("Intake server failed: {:#}", e);
            }
        });
        self.background_tasks.push(handle);

        tokio::time::sleep(Duration::from_millis(100)).await;
        info!(
            "✅ Intake accepting match requests on port {}",
            self.config.service.http_port
        );
    }

    /// Start background maintenance tasks
    fn start_background_tasks(&mut self) {
        info!("Starting health metrics task (30s interval)...");

        let context = self.health_context();
        let metrics_collector = self.metrics_collector.clone();

        let health_metrics_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));

            while *context.is_running.read().await {
                interval.tick().await;

                metrics_collector.update_uptime(context.started_at.elapsed());

                let health = HealthCheck::check(&context).await;
                metrics_collector.update_health_status(health.status.as_gauge());
                for check in &health.checks {
                    metrics_collector.update_component_health(
                        &check.name,
                        check.status == HealthStatus::Healthy,
                    );
                }
                if let Some(size) = health.stats.pool_size {
                    metrics_collector.update_pool_size(size);
                }

                debug!(
                    "Updated service health metrics - status: {}, pool_size: {:?}",
                    health.status, health.stats.pool_size
                );
            }

            info!("Health metrics task stopped");
        });

        self.background_tasks.push(health_metrics_task);
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            return;
        }

        info!("Stopping {} background tasks...", task_count);

        // Servers got their shutdown signal already; give them a moment to drain connections
        tokio::time::sleep(Duration::from_millis(200)).await;

        for task in self.background_tasks.drain(..) {
            task.abort();
        }

        info!("✅ All {} background tasks stopped", task_count);
    }
}
