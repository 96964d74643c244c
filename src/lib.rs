//! Kafka to Azure IoT Hub bridge
//!
//! Consumes messages from Kafka topics and forwards each one to IoT Hub as a
//! device-to-cloud event. Runs either as a standalone process or as an
//! IoT Edge module, in which case the edge runtime supplies the connection
//! string and events are sent on the `output1` route.
//!
//! # Example
//!
//! ```no_run
//! use clap::Parser;
//! use kafka_iothub_bridge::{bridge, Cli, RuntimeContext};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let cli = Cli::parse_from(["kafka-iothub-bridge", "-b", "localhost:9092", "-t", "sensor-data"]);
//! let runtime = RuntimeContext::from_env();
//!
//! let stats = bridge::run(&cli, &runtime).await?;
//! println!("forwarded {} events", stats.forwarded);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub use cli::Cli;
pub use error::{BridgeError, BridgeResult};
pub use runtime::{RuntimeContext, RuntimeMode};

/// Startup sequence
pub mod bridge;

/// Command-line interface
pub mod cli;

/// Kafka consumer, forwarding loop and shutdown
pub mod consumer;

/// Error types
pub mod error;

/// IoT Hub client
pub mod iothub;

/// Environment detection
pub mod runtime;

/// Logging setup
pub mod telemetry;

/// Version of the bridge
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
