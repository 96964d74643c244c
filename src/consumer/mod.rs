//! Kafka side of the bridge
//!
//! This module owns everything between the broker and the ingestion client:
//! - Consumer configuration assembly and the JSON override file
//! - The subscription and its rebalance callbacks
//! - The forwarding loop with send retries
//! - The process-wide shutdown signal
//!
//! # Example
//!
//! ```no_run
//! use kafka_iothub_bridge::consumer::{
//!     ConfigurationSet, ConsumerOptions, Forwarder, ForwarderConfig, KafkaSubscription,
//! };
//! use kafka_iothub_bridge::iothub::EventSink;
//! use kafka_iothub_bridge::runtime::RuntimeContext;
//! use std::sync::Arc;
//!
//! # async fn example(sink: Arc<dyn EventSink>) -> anyhow::Result<()> {
//! let options = ConsumerOptions::builder()
//!     .broker_list("localhost:9092")
//!     .topics(["sensor-data"])
//!     .build();
//!
//! let config = ConfigurationSet::assemble(&options)?;
//! let subscription = KafkaSubscription::subscribe(&config, &options.topics)?;
//!
//! let runtime = RuntimeContext::from_env();
//! let stats = Forwarder::new(subscription, sink, &runtime, ForwarderConfig::default())
//!     .run()
//!     .await;
//! println!("forwarded {} events", stats.forwarded);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consumer;
pub mod context;
pub mod forwarder;
pub mod processor;
pub mod retry;
pub mod shutdown;

pub use config::{load_override_file, ConfigValue, ConfigurationSet, ConsumerOptions};
pub use consumer::{KafkaSubscription, MessageSource};
pub use context::{BridgeConsumerContext, SubscriptionState};
pub use forwarder::{ForwardStats, Forwarder, ForwarderConfig};
pub use processor::{transform_for, EventTransform, InboundMessage, OutboundEvent, PassThrough};
pub use retry::{GiveUp, RetryExecutor, RetryPolicy, RetryResult};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal, ShutdownTrigger};
