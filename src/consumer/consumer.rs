//! Kafka subscription: the broker client handle and its topic subscription

use crate::consumer::{
    config::ConfigurationSet,
    context::{BridgeConsumerContext, SubscriptionState},
    processor::InboundMessage,
};
use crate::error::{BridgeError, BridgeResult};

use async_trait::async_trait;
use parking_lot::Mutex;
use rdkafka::consumer::{Consumer, StreamConsumer};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Source of broker messages polled by the forwarding loop
#[async_trait]
pub trait MessageSource: Send {
    /// Wait up to `timeout` for the next message
    ///
    /// `Ok(None)` means nothing arrived in time. An `Err` describes one failed
    /// delivery and does not end the subscription.
    async fn poll(&mut self, timeout: Duration) -> BridgeResult<Option<InboundMessage>>;
}

/// The process's single Kafka consumer, subscribed to the requested topics
///
/// Dropping it unsubscribes and closes the client.
pub struct KafkaSubscription {
    consumer: StreamConsumer<BridgeConsumerContext>,
    state: Arc<Mutex<SubscriptionState>>,
}

impl KafkaSubscription {
    /// Create the consumer from the configuration set and subscribe
    pub fn subscribe(config: &ConfigurationSet, topics: &[String]) -> BridgeResult<Self> {
        let state = Arc::new(Mutex::new(SubscriptionState::new(topics.to_vec())));
        let context = BridgeConsumerContext::new(state.clone(), config.client_id());

        let consumer: StreamConsumer<BridgeConsumerContext> = config
            .to_client_config()
            .create_with_context(context)
            .map_err(|e| BridgeError::ConfigError(format!("Failed to create consumer: {}", e)))?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topic_refs)?;

        info!(topics = ?topics, member_id = %config.client_id(), "Subscribed to topics");

        Ok(Self { consumer, state })
    }

    /// Shared view of the subscription state
    pub fn state(&self) -> Arc<Mutex<SubscriptionState>> {
        self.state.clone()
    }
}

#[async_trait]
impl MessageSource for KafkaSubscription {
    async fn poll(&mut self, timeout: Duration) -> BridgeResult<Option<InboundMessage>> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Ok(message)) => Ok(Some(InboundMessage::from_message(&message))),
            Ok(Err(e)) => Err(BridgeError::KafkaError(e)),
        }
    }
}

impl Drop for KafkaSubscription {
    fn drop(&mut self) {
        self.consumer.unsubscribe();
        let mut state = self.state.lock();
        let released = state.assigned_partitions();
        state.clear();
        info!(
            partitions = ?released,
            client_errors = self.consumer.context().transport_errors(),
            "Kafka consumer released"
        );
    }
}
