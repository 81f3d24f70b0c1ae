//! HTTP intake for match requests
//!
//! `POST /matchmake` adds the player to the waiting pool and publishes a
//! trigger. It answers as soon as both are done; match formation happens
//! later on whichever worker picks up the trigger.

use crate::amqp::messages::MessageUtils;
use crate::amqp::publisher::TriggerPublisher;
use crate::error::MatchmakingError;
use crate::metrics::MetricsCollector;
use crate::pool::WaitingPool;
use crate::utils::{current_rank, millis};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Dependencies of the intake handler
#[derive(Clone)]
pub struct IntakeState {
    pub pool: Arc<dyn WaitingPool>,
    pub triggers: Arc<dyn TriggerPublisher>,
    pub metrics: Option<Arc<MetricsCollector>>,
}

impl IntakeState {
    pub fn new(pool: Arc<dyn WaitingPool>, triggers: Arc<dyn TriggerPublisher>) -> Self {
        Self {
            pool,
            triggers,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Build the intake router
pub fn router(state: IntakeState) -> Router {
    Router::new()
        .route("/matchmake", post(matchmake_handler))
        .with_state(state)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn matchmake_handler(State(state): State<IntakeState>, body: Bytes) -> Response {
    let start_time = Instant::now();
    let response = handle_matchmake(&state, &body).await;

    let status = response.status();
    if let Some(metrics) = &state.metrics {
        metrics.record_intake_request(status.as_str(), start_time.elapsed());
    }
    debug!(
        "Match request answered {} in {:.2}ms",
        status,
        millis(start_time.elapsed())
    );

    response
}

async fn handle_matchmake(state: &IntakeState, body: &[u8]) -> Response {
    let request = match MessageUtils::deserialize_match_request(body) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejected match request: {}", e);
            let reason = match e.downcast_ref::<MatchmakingError>() {
                Some(MatchmakingError::InvalidMatchRequest { reason }) => reason.as_str(),
                _ => "Invalid request body",
            };
            return error_response(StatusCode::BAD_REQUEST, reason);
        }
    };

    let player_id = request.player.id.clone();
    let rank = current_rank();

    info!(
        "Match request - player: '{}', ping: {}ms, rank: {}",
        player_id, request.player.ping, rank
    );

    if let Err(e) = state.pool.enqueue(&player_id, rank).await {
        error!("Failed to add player '{}' to pool: {:#}", player_id, e);
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to add player to pool",
        );
    }

    let pool_size = match state.pool.size().await {
        Ok(size) => {
            debug!("Pool size after enqueue: {}", size);
            if let Some(metrics) = &state.metrics {
                metrics.update_pool_size(size);
            }
            Some(size)
        }
        Err(e) => {
            warn!("Could not read pool size: {}", e);
            None
        }
    };

    if let Err(e) = state.triggers.publish_trigger(&request).await {
        error!(
            "Failed to publish trigger for player '{}': {:#}",
            player_id, e
        );
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to publish matchmaking request",
        );
    }

    info!("Player '{}' queued, trigger published", player_id);

    (
        StatusCode::OK,
        Json(json!({
            "message": "Matchmaking request sent successfully",
            "player": request.player,
            "pool_size": pool_size,
        })),
    )
        .into_response()
}

/// Intake HTTP server with graceful shutdown
pub struct IntakeServer {
    port: u16,
    state: IntakeState,
    shutdown_tx: broadcast::Sender<()>,
}

impl IntakeServer {
    pub fn new(port: u16, state: IntakeState) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            port,
            state,
            shutdown_tx,
        }
    }

    /// Serve until [`IntakeServer::stop`] is called
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("0.0.0.0:{}", self.port)
            .parse()
            .context("Invalid intake server address")?;

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind intake server on {}", addr))?;
        info!("Intake server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, router(self.state.clone()))
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Intake server shutdown signal received");
            })
            .await?;

        info!("Intake server stopped");
        Ok(())
    }

    pub fn stop(&self) {
        if self.shutdown_tx.send(()).is_err() {
            debug!("Intake server was not running");
        }
    }
}
