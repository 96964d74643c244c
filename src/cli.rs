//! Command-line interface

use crate::consumer::config::{ConsumerOptions, DEFAULT_SESSION_TIMEOUT_MS};
use crate::consumer::forwarder::{ForwarderConfig, DEFAULT_MAX_POLL_RECORDS};
use crate::consumer::retry::RetryPolicy;
use crate::iothub::TransportProtocol;
use crate::telemetry::{LogFormat, LoggingConfig};

use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "kafka-iothub-bridge")]
#[command(version, about = "Forward Kafka topic messages to Azure IoT Hub", long_about = None)]
pub struct Cli {
    /// Kafka broker list (host:port, comma-separated)
    #[arg(short = 'b', long = "brokerlist")]
    pub broker_list: Option<String>,

    /// Topics to consume
    #[arg(short = 't', long = "topics", required = true, num_args = 1.., value_delimiter = ',')]
    pub topics: Vec<String>,

    /// Consumer group ID
    #[arg(short = 'c', long = "consumergroup")]
    pub consumer_group: Option<String>,

    /// PLAINTEXT, SSL, SASL_PLAINTEXT or SASL_SSL
    #[arg(short = 's', long = "security.protocol")]
    pub security_protocol: Option<String>,

    /// SASL mechanism, e.g. PLAIN
    #[arg(short = 'w', long = "sasl.mechanisms")]
    pub sasl_mechanism: Option<String>,

    /// SASL username
    #[arg(short = 'u', long = "username")]
    pub username: Option<String>,

    /// SASL password
    #[arg(short = 'p', long = "password", env = "KAFKA_SASL_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// CA certificate used to verify the brokers
    #[arg(short = 'l', long = "ssl.ca.location")]
    pub ssl_ca_location: Option<String>,

    /// Request broker API versions on connect
    #[arg(
        short = 'v',
        long = "api.version.request",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub api_version_request: bool,

    /// Poll timeout in milliseconds
    #[arg(
        short = 'm',
        long = "samplingrate",
        default_value_t = 1000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub sampling_rate_ms: u64,

    /// Flatten message payloads (reserved, currently pass-through)
    #[arg(short = 'f', long = "flatten")]
    pub flatten: bool,

    /// JSON file with additional Kafka client properties
    #[arg(short = 'x', long = "configFile")]
    pub config_file: Option<PathBuf>,

    /// IoT Hub transport: Mqtt_Tcp_Only, Mqtt or Mqtt_WebSocket_Only
    #[arg(long = "iothubprotocol", default_value = "Mqtt_Tcp_Only")]
    pub iothub_protocol: String,

    /// Kafka session timeout in milliseconds
    #[arg(long = "session.timeout.ms", default_value_t = DEFAULT_SESSION_TIMEOUT_MS)]
    pub session_timeout_ms: u32,

    /// Messages taken per poll cycle
    #[arg(long = "max.poll.records", default_value_t = DEFAULT_MAX_POLL_RECORDS)]
    pub max_poll_records: usize,

    /// Send retries before an event is dropped
    #[arg(long = "send-retries", default_value_t = 3)]
    pub send_retries: u32,

    /// Initial backoff between send retries in milliseconds
    #[arg(long = "send-backoff-ms", default_value_t = 100)]
    pub send_backoff_ms: u64,

    /// Log output format: pretty or json
    #[arg(long = "log-format", env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    pub debug: bool,
}

impl Cli {
    /// Kafka consumer options from the parsed flags
    pub fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions {
            broker_list: self.broker_list.clone(),
            topics: self.topics.clone(),
            consumer_group: self.consumer_group.clone(),
            security_protocol: self.security_protocol.clone(),
            sasl_mechanism: self.sasl_mechanism.clone(),
            sasl_username: self.username.clone(),
            sasl_password: self.password.clone(),
            ssl_ca_location: self.ssl_ca_location.clone(),
            api_version_request: self.api_version_request,
            session_timeout_ms: self.session_timeout_ms,
            override_file: self.config_file.clone(),
        }
    }

    /// Forwarding loop settings: poll timeout, batch size and send retries
    pub fn forwarder_config(&self) -> ForwarderConfig {
        ForwarderConfig {
            sampling_interval: Duration::from_millis(self.sampling_rate_ms),
            max_poll_records: self.max_poll_records,
            retry_policy: RetryPolicy::new(
                self.send_retries,
                Duration::from_millis(self.send_backoff_ms),
            ),
        }
    }

    /// Log output settings
    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            format: self.log_format,
            debug: self.debug,
        }
    }

    /// Parsed transport name; unsupported names are a startup error
    pub fn transport_protocol(&self) -> crate::error::BridgeResult<TransportProtocol> {
        self.iothub_protocol.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_is_well_formed() {
        Cli::command().debug_assert();
    }
}
