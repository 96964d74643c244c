//! The forwarding loop: poll, transform, send, repeat until cancelled

use crate::consumer::{
    consumer::MessageSource,
    processor::{EventTransform, InboundMessage, OutboundEvent, PassThrough},
    retry::{GiveUp, RetryExecutor, RetryPolicy, RetryResult},
    shutdown::ShutdownSignal,
};
use crate::error::BridgeError;
use crate::iothub::EventSink;
use crate::runtime::RuntimeContext;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default bounded wait per poll
pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_millis(1000);

/// Default number of messages taken per poll cycle
pub const DEFAULT_MAX_POLL_RECORDS: usize = 100;

/// Forwarding loop settings
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Bounded wait for the first message of a poll cycle
    pub sampling_interval: Duration,
    /// Messages taken per poll cycle before the next bounded wait
    pub max_poll_records: usize,
    /// Retry policy for failed sends
    pub retry_policy: RetryPolicy,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            sampling_interval: DEFAULT_SAMPLING_INTERVAL,
            max_poll_records: DEFAULT_MAX_POLL_RECORDS,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Counters reported when the loop ends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardStats {
    /// Messages received from the broker
    pub received: u64,
    /// Events accepted by the ingestion endpoint
    pub forwarded: u64,
    /// Deliveries skipped because of a consume error
    pub consume_errors: u64,
    /// Polls that failed because the broker could not be reached
    pub transport_errors: u64,
    /// Events given up on after send retries
    pub dropped: u64,
}

/// Moves messages from a [`MessageSource`] to an [`EventSink`]
///
/// One message at a time: each send is awaited before the next poll, so a
/// slow endpoint slows consumption. The loop checks the shutdown signal
/// before every poll and releases the source when it returns.
pub struct Forwarder<S: MessageSource> {
    source: S,
    sink: Arc<dyn EventSink>,
    transform: Box<dyn EventTransform>,
    route: Option<String>,
    config: ForwarderConfig,
    retry: RetryExecutor,
    shutdown: Arc<ShutdownSignal>,
    stats: ForwardStats,
}

impl<S: MessageSource> Forwarder<S> {
    /// Create a forwarder using the routing mode and signal of `runtime`
    pub fn new(
        source: S,
        sink: Arc<dyn EventSink>,
        runtime: &RuntimeContext,
        config: ForwarderConfig,
    ) -> Self {
        Self {
            source,
            sink,
            transform: Box::new(PassThrough),
            route: runtime.output_route().map(str::to_string),
            retry: RetryExecutor::new(config.retry_policy.clone(), runtime.shutdown()),
            config,
            shutdown: runtime.shutdown(),
            stats: ForwardStats::default(),
        }
    }

    /// Replace the message transform
    pub fn with_transform(mut self, transform: Box<dyn EventTransform>) -> Self {
        self.transform = transform;
        self
    }

    /// Run until the shutdown signal is set
    pub async fn run(mut self) -> ForwardStats {
        info!(
            sampling_interval = ?self.config.sampling_interval,
            max_poll_records = self.config.max_poll_records,
            route = self.route.as_deref().unwrap_or("<default>"),
            transform = self.transform.name(),
            "Forwarding loop started"
        );

        while !self.shutdown.is_cancelled() {
            self.poll_cycle().await;
        }

        let Self { source, stats, .. } = self;
        drop(source);

        info!(
            received = stats.received,
            forwarded = stats.forwarded,
            consume_errors = stats.consume_errors,
            transport_errors = stats.transport_errors,
            dropped = stats.dropped,
            "Forwarding loop stopped"
        );
        stats
    }

    /// Wait up to the sampling interval for a message, then drain what is
    /// already buffered, up to `max_poll_records` in total.
    async fn poll_cycle(&mut self) {
        let mut wait = self.config.sampling_interval;

        for _ in 0..self.config.max_poll_records.max(1) {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.source.poll(wait).await {
                Ok(Some(message)) => {
                    self.stats.received += 1;
                    self.forward(message).await;
                }
                Ok(None) => break,
                Err(e) if e.is_transport() => {
                    self.stats.transport_errors += 1;
                    error!(error = %e, "Kafka transport error");
                    self.pause().await;
                    break;
                }
                Err(e) => {
                    self.stats.consume_errors += 1;
                    warn!(error = %e, "Consume error, skipping message");
                    break;
                }
            }

            wait = Duration::ZERO;
        }
    }

    /// Sleep one sampling interval unless shutdown comes first
    async fn pause(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.sampling_interval) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }

    async fn forward(&mut self, message: InboundMessage) {
        info!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            key = message.key_lossy().as_deref().unwrap_or("-"),
            payload = %message.payload_lossy(),
            "Received message"
        );

        let Some(payload) = message.payload.as_ref() else {
            self.stats.consume_errors += 1;
            let e = BridgeError::ConsumeError {
                topic: message.topic.clone(),
                partition: message.partition,
                offset: message.offset,
                reason: "message has no payload".to_string(),
            };
            warn!(error = %e, "Consume error, skipping message");
            return;
        };

        for body in self.transform.transform(&message, payload) {
            let event = OutboundEvent::new(body, self.route.clone());
            self.send(event, &message).await;
        }
    }

    async fn send(&mut self, event: OutboundEvent, message: &InboundMessage) {
        debug!(at = %chrono::Local::now().to_rfc3339(), "Sending kafka message");

        let sink = self.sink.clone();
        let result = self
            .retry
            .run(|| {
                let sink = sink.clone();
                let event = event.clone();
                async move { sink.send_event(event).await }
            })
            .await;

        match result {
            RetryResult::Success { retries, .. } => {
                self.stats.forwarded += 1;
                debug!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    retries,
                    "Event forwarded"
                );
            }
            RetryResult::Failed {
                error,
                retries,
                reason,
            } => {
                self.stats.dropped += 1;
                error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    retries,
                    cancelled = reason == GiveUp::Cancelled,
                    error = %error,
                    "Dropping event after failed send"
                );
            }
        }
    }
}
