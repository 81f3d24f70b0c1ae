//! Outbound messages: drain triggers and committed match events

use crate::amqp::messages::{MatchFormedEnvelope, MessageUtils, MATCH_FORMED_ROUTING_KEY};
use crate::error::{MatchmakingError, Result};
use crate::types::{Match, MatchFormed, MatchRequest};
use amqprs::{
    channel::{
        BasicPublishArguments, Channel, ExchangeDeclareArguments, QueueDeclareArguments,
    },
    BasicProperties,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Sink for committed matches
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MatchPublisher: Send + Sync {
    /// Hand a committed match downstream. Failures never un-commit the match.
    async fn publish_match(&self, formed: &Match) -> Result<()>;
}

/// Wakes a worker to drain the pool
#[async_trait]
pub trait TriggerPublisher: Send + Sync {
    async fn publish_trigger(&self, request: &MatchRequest) -> Result<()>;
}

/// Configuration for publish retries
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

fn bus_error(message: String) -> anyhow::Error {
    MatchmakingError::BusUnavailable { message }.into()
}

/// Publish with exponential backoff, capped at 5s between attempts
async fn publish_with_retry(
    channel: &Channel,
    config: &PublisherConfig,
    exchange: &str,
    routing_key: &str,
    message_id: &str,
    payload: Vec<u8>,
) -> Result<()> {
    let mut retry_count = 0;
    let mut delay = Duration::from_millis(config.retry_delay_ms);

    loop {
        let args = BasicPublishArguments::new(exchange, routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(message_id)
            .with_timestamp(chrono::Utc::now().timestamp() as u64)
            .with_content_type("application/json")
            .with_delivery_mode(2);

        match channel.basic_publish(properties, payload.clone(), args).await {
            Ok(()) => {
                debug!(
                    "Published message {} to '{}' with routing key '{}'",
                    message_id, exchange, routing_key
                );
                return Ok(());
            }
            Err(e) => {
                retry_count += 1;
                if retry_count > config.max_retries {
                    error!(
                        "Failed to publish message {} after {} retries: {}",
                        message_id, config.max_retries, e
                    );
                    return Err(bus_error(format!("Failed to publish message: {}", e)));
                }

                warn!(
                    "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                    retry_count, message_id, e, delay
                );

                sleep(delay).await;
                delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
            }
        }
    }
}

/// Default match sink: one structured log record per match
#[derive(Debug, Default, Clone)]
pub struct LoggingMatchPublisher;

#[async_trait]
impl MatchPublisher for LoggingMatchPublisher {
    async fn publish_match(&self, formed: &Match) -> Result<()> {
        info!(
            match_id = %formed.match_id,
            player_count = formed.players.len(),
            player_ids = ?formed.player_ids(),
            "Match formed"
        );
        Ok(())
    }
}

/// Publishes `MatchFormed` envelopes to a topic exchange
pub struct AmqpMatchPublisher {
    channel: Channel,
    exchange: String,
    config: PublisherConfig,
}

impl AmqpMatchPublisher {
    /// Create the publisher and declare its exchange
    pub async fn new(
        channel: Channel,
        exchange: impl Into<String>,
        config: PublisherConfig,
    ) -> Result<Self> {
        let publisher = Self {
            channel,
            exchange: exchange.into(),
            config,
        };

        let args = ExchangeDeclareArguments::new(&publisher.exchange, "topic")
            .durable(true)
            .finish();
        publisher
            .channel
            .exchange_declare(args)
            .await
            .map_err(|e| bus_error(format!("Failed to declare match exchange: {}", e)))?;

        info!("Declared match events exchange '{}'", publisher.exchange);
        Ok(publisher)
    }
}

#[async_trait]
impl MatchPublisher for AmqpMatchPublisher {
    async fn publish_match(&self, formed: &Match) -> Result<()> {
        // Match events also get the log record, the exchange is an extra sink
        LoggingMatchPublisher.publish_match(formed).await?;

        let envelope = MatchFormedEnvelope::new(
            MatchFormed::from(formed.clone()),
            MATCH_FORMED_ROUTING_KEY,
        );
        let payload = envelope.to_bytes()?;

        publish_with_retry(
            &self.channel,
            &self.config,
            &self.exchange,
            &envelope.routing_key,
            &envelope.correlation_id,
            payload,
        )
        .await
    }
}

/// Publishes triggers to the durable work queue through the default exchange
pub struct AmqpTriggerPublisher {
    channel: Channel,
    queue: String,
    config: PublisherConfig,
}

impl AmqpTriggerPublisher {
    /// Create the publisher and make sure the trigger queue exists
    pub async fn new(channel: Channel, queue: impl Into<String>, config: PublisherConfig) -> Result<Self> {
        let queue = queue.into();
        declare_trigger_queue(&channel, &queue).await?;

        Ok(Self {
            channel,
            queue,
            config,
        })
    }
}

#[async_trait]
impl TriggerPublisher for AmqpTriggerPublisher {
    async fn publish_trigger(&self, request: &MatchRequest) -> Result<()> {
        let payload = MessageUtils::serialize_trigger(request)?;
        let message_id = uuid::Uuid::new_v4().to_string();

        publish_with_retry(&self.channel, &self.config, "", &self.queue, &message_id, payload).await
    }
}

/// Declare the durable trigger queue shared by intake and workers
pub async fn declare_trigger_queue(channel: &Channel, queue: &str) -> Result<()> {
    let args = QueueDeclareArguments::new(queue)
        .durable(true)
        .auto_delete(false)
        .finish();

    channel
        .queue_declare(args)
        .await
        .map_err(|e| bus_error(format!("Failed to declare trigger queue '{}': {}", queue, e)))?;

    debug!("Declared trigger queue '{}'", queue);
    Ok(())
}

/// In-process trigger bus for single-process deployments and tests
#[derive(Debug, Clone)]
pub struct ChannelTriggerPublisher {
    sender: mpsc::Sender<Vec<u8>>,
}

impl ChannelTriggerPublisher {
    /// Create a publisher and the receiving end a worker consumes from
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl TriggerPublisher for ChannelTriggerPublisher {
    async fn publish_trigger(&self, request: &MatchRequest) -> Result<()> {
        let payload = MessageUtils::serialize_trigger(request)?;
        self.sender
            .send(payload)
            .await
            .map_err(|_| bus_error("Local trigger channel closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Player;

    #[test]
    fn test_publisher_config_default() {
        let config = PublisherConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 500);
    }

    #[tokio::test]
    async fn test_logging_publisher_accepts_match() {
        let formed = Match {
            match_id: crate::utils::generate_match_id(),
            players: vec![Player::new("a"), Player::new("b")],
            created_at: chrono::Utc::now(),
        };

        assert!(LoggingMatchPublisher.publish_match(&formed).await.is_ok());
    }

    #[tokio::test]
    async fn test_channel_trigger_publisher() {
        let (publisher, mut receiver) = ChannelTriggerPublisher::channel(4);
        let request = MatchRequest {
            player: Player::new("p1"),
        };

        publisher.publish_trigger(&request).await.unwrap();

        let payload = receiver.recv().await.unwrap();
        assert_eq!(MessageUtils::describe_trigger(&payload), "player 'p1'");
    }

    #[tokio::test]
    async fn test_channel_trigger_publisher_closed() {
        let (publisher, receiver) = ChannelTriggerPublisher::channel(1);
        drop(receiver);

        let error = publisher
            .publish_trigger(&MatchRequest {
                player: Player::new("p1"),
            })
            .await
            .unwrap_err();
        assert!(MatchmakingError::is_retryable_error(&error));
    }

    // Note: publishing against a live broker is covered by the pool-tester binary
}
