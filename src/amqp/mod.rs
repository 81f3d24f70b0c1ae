//! AMQP integration for the matchmaking service
//!
//! Triggers travel over a durable work queue; committed matches can
//! optionally be published to a topic exchange.

pub mod connection;
pub mod consumer;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use consumer::TriggerConsumer;
pub use messages::*;
pub use publisher::{
    AmqpMatchPublisher, AmqpTriggerPublisher, ChannelTriggerPublisher, LoggingMatchPublisher,
    MatchPublisher, PublisherConfig, TriggerPublisher,
};
