//! Trigger consumption from the durable work queue
//!
//! Every worker instance consumes the same queue with manual acknowledgement
//! and a prefetch of one, so the broker hands each trigger to exactly one
//! idle instance and redelivers it if that instance dies mid-drain.

use crate::amqp::publisher::declare_trigger_queue;
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::utils::millis;
use crate::worker::{MatchmakeWorker, TriggerDecision};
use amqprs::{
    channel::{
        BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, BasicNackArguments,
        BasicQosArguments, Channel,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Subscription of one worker to the trigger queue
pub struct TriggerConsumer {
    worker: Arc<MatchmakeWorker>,
    channel: Channel,
    consumer_tag: String,
    metrics: Option<Arc<MetricsCollector>>,
}

impl TriggerConsumer {
    pub fn new(worker: Arc<MatchmakeWorker>, channel: Channel) -> Self {
        let consumer_tag = format!("matchmake-worker-{}", uuid::Uuid::new_v4());

        Self {
            worker,
            channel,
            consumer_tag,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Declare the queue, limit unacked deliveries and start consuming
    pub async fn start_consuming(&self, queue_name: &str, prefetch_count: u16) -> Result<()> {
        declare_trigger_queue(&self.channel, queue_name).await?;

        self.channel
            .basic_qos(BasicQosArguments::new(0, prefetch_count, false))
            .await
            .map_err(|e| MatchmakingError::BusUnavailable {
                message: format!("Failed to set prefetch count: {}", e),
            })?;

        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag)
            .manual_ack(true)
            .finish();

        self.channel
            .basic_consume(
                TriggerDelivery::new(self.worker.clone(), self.metrics.clone()),
                args,
            )
            .await
            .map_err(|e| MatchmakingError::BusUnavailable {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!(
            "Consuming triggers from queue '{}' (tag {}, prefetch {})",
            queue_name, self.consumer_tag, prefetch_count
        );
        Ok(())
    }

    /// Stop receiving new triggers. A drain already running keeps going.
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            MatchmakingError::BusUnavailable {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming triggers");
        Ok(())
    }
}

/// Per-delivery handler registered with the broker
struct TriggerDelivery {
    worker: Arc<MatchmakeWorker>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl TriggerDelivery {
    fn new(worker: Arc<MatchmakeWorker>, metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self { worker, metrics }
    }

    fn record(&self, operation: &str, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_amqp_operation(operation, success);
        }
    }
}

#[async_trait]
impl AsyncConsumer for TriggerDelivery {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        let start_time = Instant::now();

        info!(
            "Trigger received - delivery_tag: {}, redelivered: {}, size: {} bytes",
            delivery_tag,
            deliver.redelivered(),
            content.len()
        );

        let decision = self.worker.handle_trigger(&content).await;

        let settled = match decision {
            TriggerDecision::Acknowledge => channel
                .basic_ack(BasicAckArguments::new(delivery_tag, false))
                .await
                .map(|_| "ack"),
            TriggerDecision::Requeue => channel
                .basic_nack(BasicNackArguments::new(delivery_tag, false, true))
                .await
                .map(|_| "nack"),
        };

        match settled {
            Ok(operation) => {
                self.record(operation, true);
                info!(
                    "Trigger settled - delivery_tag: {}, decision: {}, time: {:.2}ms",
                    delivery_tag,
                    decision.as_str(),
                    millis(start_time.elapsed())
                );
            }
            Err(e) => {
                // The broker redelivers unacked messages once the channel closes
                self.record("settle", false);
                error!(
                    "Failed to settle trigger - delivery_tag: {}, decision: {}, error: {}",
                    delivery_tag,
                    decision.as_str(),
                    e
                );
            }
        }

        if decision == TriggerDecision::Requeue {
            warn!("Trigger {} returned to queue for redelivery", delivery_tag);
        }
    }
}
