//! AMQP message definitions and serialization

use crate::error::{MatchmakingError, Result};
use crate::types::{MatchFormed, MatchRequest};

/// Default queue carrying drain triggers
pub const TRIGGER_QUEUE: &str = "matchmake";

/// Default topic exchange for committed matches
pub const MATCH_EVENTS_EXCHANGE: &str = "matchmaking.match_events";

pub const MATCH_FORMED_ROUTING_KEY: &str = "match.formed";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    pub fn new(payload: T, routing_key: impl Into<String>) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key: routing_key.into(),
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Envelope published for every committed match
pub type MatchFormedEnvelope = MessageEnvelope<MatchFormed>;

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Check a match request before it touches the pool
    pub fn validate_match_request(request: &MatchRequest) -> Result<()> {
        if request.player.id.trim().is_empty() {
            return Err(MatchmakingError::InvalidMatchRequest {
                reason: "Player ID cannot be empty".to_string(),
            }
            .into());
        }

        if request.player.ping < 0 {
            return Err(MatchmakingError::InvalidMatchRequest {
                reason: "Ping cannot be negative".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Parse and validate a match request body
    pub fn deserialize_match_request(bytes: &[u8]) -> Result<MatchRequest> {
        let request: MatchRequest =
            serde_json::from_slice(bytes).map_err(|e| MatchmakingError::MalformedRequest {
                message: format!("Failed to deserialize match request: {}", e),
            })?;

        Self::validate_match_request(&request)?;
        Ok(request)
    }

    /// Trigger payload for a request. The worker drains regardless of content.
    pub fn serialize_trigger(request: &MatchRequest) -> Result<Vec<u8>> {
        serde_json::to_vec(request).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize trigger: {}", e),
            }
            .into()
        })
    }

    /// Best-effort description of a trigger payload for logs
    pub fn describe_trigger(content: &[u8]) -> String {
        match serde_json::from_slice::<MatchRequest>(content) {
            Ok(request) => format!("player '{}'", request.player.id),
            Err(_) if content.is_empty() => "empty payload".to_string(),
            Err(_) => format!("{} byte opaque payload", content.len()),
        }
    }
}
