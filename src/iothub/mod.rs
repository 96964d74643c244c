//! Azure IoT Hub ingestion client
//!
//! Events are published as device-to-cloud messages over MQTT 3.1.1, either
//! directly to IoT Hub or through a local IoT Edge hub. Authentication uses a
//! shared access signature derived from the device or module connection
//! string.

pub mod client;
pub mod connection_string;
pub mod sas;

pub use client::{IotHubClient, TransportProtocol, TransportSettings};
pub use connection_string::ConnectionString;

use crate::consumer::processor::OutboundEvent;
use crate::error::BridgeResult;
use async_trait::async_trait;

/// Destination for forwarded events
///
/// `send_event` resolves once the endpoint has acknowledged the event.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Send one event and wait for the acknowledgement
    async fn send_event(&self, event: OutboundEvent) -> BridgeResult<()>;
}
