//! Error types for the bridge

use rdkafka::error::RDKafkaErrorCode;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Bridge error types
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Invalid or incomplete broker client configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The override file could not be read
    #[error("Failed to read override file {path}: {source}")]
    OverrideFileRead {
        /// Path given on the command line
        path: PathBuf,
        /// Underlying IO failure
        source: io::Error,
    },

    /// The override file is not a flat JSON object of scalar values
    #[error("Malformed override file {path}: {source}")]
    OverrideFileFormat {
        /// Path given on the command line
        path: PathBuf,
        /// Underlying parse failure
        source: serde_json::Error,
    },

    /// Neither `EdgeHubConnectionString` nor `_HUB_CS` is set
    #[error("No IoT Hub connection string configured")]
    MissingConnectionString,

    /// The connection string is missing a field or is badly formed
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// The edge CA certificate is missing or unreadable
    #[error("Certificate error: {0}")]
    CertificateError(String),

    /// The requested IoT Hub transport is not available
    #[error("Unsupported IoT Hub transport: {0}")]
    UnsupportedTransport(String),

    /// Kafka client errors
    #[error("Kafka error: {0}")]
    KafkaError(#[from] rdkafka::error::KafkaError),

    /// A delivered message could not be turned into an event
    #[error("Consume error on {topic}/{partition}@{offset}: {reason}")]
    ConsumeError {
        /// Source topic
        topic: String,
        /// Source partition
        partition: i32,
        /// Offset within the partition
        offset: i64,
        /// What was wrong with the message
        reason: String,
    },

    /// Opening the connection to the hub failed
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Sending an event to the hub failed
    #[error("Send error: {0}")]
    SendError(String),

    /// The encoded publish exceeds the hub's packet limit
    #[error("Event too large: {size} bytes exceeds the {limit} byte limit")]
    EventTooLarge {
        /// Encoded packet size
        size: usize,
        /// Largest packet the hub accepts
        limit: usize,
    },
}

impl BridgeError {
    /// Check if a failed send may succeed when attempted again
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::SendError(_) => true,
            BridgeError::ConnectionError(_) => true,
            BridgeError::KafkaError(e) => {
                !matches!(e, rdkafka::error::KafkaError::MessageConsumption(_))
            }
            _ => false,
        }
    }

    /// Check if a poll failed because the broker connection is down or was
    /// refused, as opposed to one bad delivery
    pub fn is_transport(&self) -> bool {
        let BridgeError::KafkaError(e) = self else {
            return false;
        };
        matches!(
            e.rdkafka_error_code(),
            Some(
                RDKafkaErrorCode::BrokerTransportFailure
                    | RDKafkaErrorCode::AllBrokersDown
                    | RDKafkaErrorCode::Resolve
                    | RDKafkaErrorCode::NetworkException
                    | RDKafkaErrorCode::BrokerNotAvailable
                    | RDKafkaErrorCode::RequestTimedOut
                    | RDKafkaErrorCode::Authentication
                    | RDKafkaErrorCode::SSL
            )
        )
    }

    /// Get error severity
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            BridgeError::ConsumeError { .. } => ErrorSeverity::Warning,
            BridgeError::KafkaError(_) => ErrorSeverity::Error,
            BridgeError::SendError(_) => ErrorSeverity::Error,
            BridgeError::ConnectionError(_) => ErrorSeverity::Error,
            BridgeError::EventTooLarge { .. } => ErrorSeverity::Error,
            BridgeError::ConfigError(_)
            | BridgeError::OverrideFileRead { .. }
            | BridgeError::OverrideFileFormat { .. }
            | BridgeError::MissingConnectionString
            | BridgeError::InvalidConnectionString(_)
            | BridgeError::CertificateError(_)
            | BridgeError::UnsupportedTransport(_) => ErrorSeverity::Fatal,
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Skips one message, processing continues
    Warning,
    /// Reported, the pipeline keeps running
    Error,
    /// Aborts startup
    Fatal,
}
