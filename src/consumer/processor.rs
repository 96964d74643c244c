//! Inbound messages, outbound events and the transform between them

use bytes::Bytes;
use rdkafka::Message;

/// One message delivered by the broker
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Message topic
    pub topic: String,
    /// Message partition
    pub partition: i32,
    /// Message offset
    pub offset: i64,
    /// Message key (if present)
    pub key: Option<Bytes>,
    /// Message payload (absent for tombstones)
    pub payload: Option<Bytes>,
}

impl InboundMessage {
    /// Create a message with the given payload
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload: Some(payload.into()),
        }
    }

    /// Copy the parts the bridge needs out of a Kafka message
    pub fn from_message<M: Message>(message: &M) -> Self {
        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(Bytes::copy_from_slice),
            payload: message.payload().map(Bytes::copy_from_slice),
        }
    }

    /// Key as text, for log lines
    pub fn key_lossy(&self) -> Option<String> {
        self.key
            .as_ref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
    }

    /// Payload as text, for log lines
    pub fn payload_lossy(&self) -> String {
        self.payload
            .as_ref()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .unwrap_or_default()
    }
}

/// One event handed to the ingestion endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEvent {
    /// Event body
    pub body: Bytes,
    /// Named output route, set in host-managed mode
    pub output: Option<String>,
}

impl OutboundEvent {
    /// Event with the given body, sent to `output` when one is set
    pub fn new(body: impl Into<Bytes>, output: Option<String>) -> Self {
        Self {
            body: body.into(),
            output,
        }
    }
}

/// Turns one inbound message into zero or more event bodies
pub trait EventTransform: Send + Sync {
    /// Produce the event bodies for a message with a payload
    fn transform(&self, message: &InboundMessage, payload: &Bytes) -> Vec<Bytes>;

    /// Get transform name for logs
    fn name(&self) -> &str {
        "EventTransform"
    }
}

/// Forwards the raw payload bytes unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl EventTransform for PassThrough {
    fn transform(&self, _message: &InboundMessage, payload: &Bytes) -> Vec<Bytes> {
        vec![payload.clone()]
    }

    fn name(&self) -> &str {
        "pass-through"
    }
}

/// Pick the transform for the `--flatten` switch
///
/// Flattening has no defined semantics yet, so both settings select the
/// pass-through transform.
pub fn transform_for(flatten: bool) -> Box<dyn EventTransform> {
    if flatten {
        tracing::warn!("--flatten is not implemented yet, forwarding payloads unchanged");
    }
    Box::new(PassThrough)
}
