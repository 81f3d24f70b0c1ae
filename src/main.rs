//! Main entry point for the FIFO matchmaking service
//!
//! Runs the intake endpoint, the trigger-driven worker, or both, depending
//! on the configured role, with structured logging and graceful shutdown.

use anyhow::Result;
use clap::Parser;
use fifo_matchmaker::config::{validate_config, AppConfig, PoolBackend, ServiceRole};
use fifo_matchmaker::service::{AppState, HealthCheck, HealthStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// FIFO Matchmaker - groups waiting players into matches in arrival order
#[derive(Parser)]
#[command(
    name = "fifo-matchmaker",
    version,
    about = "Pool-draining matchmaking service with first-come first-served grouping",
    long_about = "FIFO Matchmaker accepts match requests over HTTP, keeps waiting players in a \
                 shared sorted pool, and drains that pool into matches of 2 to 16 players \
                 whenever a matchmaking trigger arrives over AMQP. Any number of worker \
                 instances can drain the same pool without ever placing a player twice."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Perform health check and exit
    #[arg(long, help = "Perform a health check and exit with status code")]
    health_check: bool,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Role override
    #[arg(long, value_name = "ROLE", help = "Run as worker, intake or all")]
    role: Option<ServiceRole>,

    /// Pool backend override
    #[arg(long, value_name = "BACKEND", help = "Waiting pool backend (redis, memory)")]
    pool_backend: Option<PoolBackend>,

    /// Redis URL override
    #[arg(long, value_name = "URL", help = "Override Redis connection URL")]
    redis_url: Option<String>,

    /// AMQP URL override
    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    /// HTTP port override
    #[arg(long, value_name = "PORT", help = "Override intake HTTP port")]
    http_port: Option<u16>,

    /// Health port override
    #[arg(long, value_name = "PORT", help = "Override health and metrics port")]
    health_port: Option<u16>,

    /// Batch size override
    #[arg(long, value_name = "N", help = "Players read from the pool per batch")]
    batch_size: Option<usize>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Probe the pool and broker once and exit with the result
async fn perform_health_check(config: AppConfig) -> Result<()> {
    info!("Performing health check...");

    let app_state = AppState::new(config).await?;
    let mut context = app_state.health_context();
    // Components are probed without starting the service
    context.is_running = Arc::new(RwLock::new(true));

    let health = HealthCheck::check(&context).await;
    println!("Health Check: {}", health.status);
    println!("  Role: {}", health.stats.role);
    match health.stats.pool_size {
        Some(size) => println!("  Players Waiting: {}", size),
        None => println!("  Players Waiting: unknown"),
    }
    for check in &health.checks {
        match &check.message {
            Some(message) => println!("  {}: {} ({})", check.name, check.status, message),
            None => println!("  {}: {}", check.name, check.status),
        }
    }

    if health.status == HealthStatus::Healthy {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    info!("🚀 FIFO Matchmaking Service");
    info!("   Service: {}", config.service.name);
    info!("   Role: {}", config.service.role);
    info!("   Log level: {}", config.service.log_level);
    if config.service.role.runs_intake() {
        info!("   Intake port: {}", config.service.http_port);
    }
    info!("   Health port: {}", config.service.health_port);
    match config.pool.backend {
        PoolBackend::Redis => info!(
            "   Pool: redis {} (key '{}')",
            config.pool.redis_url, config.pool.pool_key
        ),
        PoolBackend::Memory => info!("   Pool: in-memory"),
    }
    info!("   Trigger queue: {}", config.amqp.trigger_queue);
    info!(
        "   Batch size: {} (max {} conflicting batches per drain)",
        config.matchmaking.batch_size, config.matchmaking.max_commit_retries
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load and merge configuration from environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    // Apply CLI overrides
    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(role) = args.role {
        config.service.role = role;
    }

    if let Some(backend) = args.pool_backend {
        config.pool.backend = backend;
    }

    if let Some(redis_url) = &args.redis_url {
        config.pool.redis_url = redis_url.clone();
    }

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }

    if let Some(http_port) = args.http_port {
        config.service.http_port = http_port;
    }

    if let Some(health_port) = args.health_port {
        config.service.health_port = health_port;
    }

    if let Some(batch_size) = args.batch_size {
        config.matchmaking.batch_size = batch_size;
    }

    // Overrides can break what the loaders validated
    validate_config(&config)?;

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration (CLI args can override environment/config file)
    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {:#}", e);
        std::process::exit(1);
    });

    // Initialize logging early (before any other operations)
    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return perform_health_check(config).await;
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config);

    info!("Initializing service components...");
    let mut app_state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting service...");
    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        if let Err(e) = app_state.shutdown().await {
            warn!("Cleanup after failed start also failed: {}", e);
        }
        std::process::exit(1);
    }

    info!("✅ FIFO Matchmaking Service is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    wait_for_shutdown_signal().await;

    info!("🛑 Shutdown signal received, beginning graceful shutdown...");

    // Worker drain gets the shutdown timeout inside; allow a little more for the rest
    let shutdown_timeout = config.shutdown_timeout() + std::time::Duration::from_secs(5);
    match tokio::time::timeout(shutdown_timeout, app_state.shutdown()).await {
        Ok(Ok(())) => info!("✅ Graceful shutdown completed successfully"),
        Ok(Err(e)) => warn!("Shutdown finished with errors: {}", e),
        Err(_) => warn!("⚠️  Shutdown timeout exceeded, forcing exit"),
    }

    info!("🛑 FIFO Matchmaking Service stopped");
    Ok(())
}
