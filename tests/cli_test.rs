use clap::error::ErrorKind;
use clap::Parser;
use kafka_iothub_bridge::consumer::ConfigurationSet;
use kafka_iothub_bridge::iothub::TransportProtocol;
use kafka_iothub_bridge::telemetry::LogFormat;
use kafka_iothub_bridge::{BridgeError, Cli};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::time::Duration;

fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
    Cli::try_parse_from(std::iter::once("kafka-iothub-bridge").chain(args.iter().copied()))
}

#[test]
fn test_minimal_invocation_defaults() {
    let cli = parse(&["-b", "broker1:9092", "-t", "sensor-data"]).unwrap();

    assert_eq!(cli.topics, vec!["sensor-data".to_string()]);
    assert!(cli.api_version_request);
    assert!(!cli.flatten);
    assert_eq!(cli.sampling_rate_ms, 1000);
    assert_eq!(cli.session_timeout_ms, 30000);
    assert_eq!(cli.max_poll_records, 100);
    assert_eq!(cli.log_format, LogFormat::Pretty);
    assert_eq!(cli.transport_protocol().unwrap(), TransportProtocol::MqttTcpOnly);

    let forwarder = cli.forwarder_config();
    assert_eq!(forwarder.sampling_interval, Duration::from_millis(1000));
    assert_eq!(forwarder.retry_policy.max_retries, 3);
}

#[test]
fn test_topics_are_required() {
    let err = parse(&["-b", "broker1:9092"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn test_multiple_topics() {
    let cli = parse(&["-t", "a", "b", "--topics", "c,d"]).unwrap();
    assert_eq!(cli.topics, vec!["a", "b", "c", "d"]);
}

#[test]
fn test_full_option_set() {
    let cli = parse(&[
        "-b", "b1:9093,b2:9093",
        "-t", "sensor-data",
        "-c", "bridge",
        "-s", "SASL_SSL",
        "-w", "PLAIN",
        "-u", "user",
        "-p", "secret",
        "-l", "/etc/ssl/ca.pem",
        "-v", "false",
        "-m", "250",
        "-f",
        "-x", "/etc/bridge/overrides.json",
        "--iothubprotocol", "Mqtt_WebSocket_Only",
        "--session.timeout.ms", "45000",
        "--max.poll.records", "10",
        "--send-retries", "5",
        "--log-format", "json",
    ])
    .unwrap();

    let options = cli.consumer_options();
    assert_eq!(options.broker_list.as_deref(), Some("b1:9093,b2:9093"));
    assert_eq!(options.consumer_group.as_deref(), Some("bridge"));
    assert_eq!(options.security_protocol.as_deref(), Some("SASL_SSL"));
    assert_eq!(options.sasl_mechanism.as_deref(), Some("PLAIN"));
    assert_eq!(options.sasl_username.as_deref(), Some("user"));
    assert_eq!(options.sasl_password.as_deref(), Some("secret"));
    assert_eq!(options.ssl_ca_location.as_deref(), Some("/etc/ssl/ca.pem"));
    assert!(!options.api_version_request);
    assert_eq!(options.session_timeout_ms, 45000);
    assert_eq!(
        options.override_file,
        Some(PathBuf::from("/etc/bridge/overrides.json"))
    );

    assert!(cli.flatten);
    assert_eq!(cli.log_format, LogFormat::Json);
    assert_eq!(
        cli.transport_protocol().unwrap(),
        TransportProtocol::MqttWebSocketOnly
    );

    let forwarder = cli.forwarder_config();
    assert_eq!(forwarder.sampling_interval, Duration::from_millis(250));
    assert_eq!(forwarder.max_poll_records, 10);
    assert_eq!(forwarder.retry_policy.max_retries, 5);
}

#[test]
fn test_unsupported_transport_is_a_startup_error() {
    let cli = parse(&["-t", "t", "--iothubprotocol", "Amqp"]).unwrap();
    assert!(matches!(
        cli.transport_protocol(),
        Err(BridgeError::UnsupportedTransport(_))
    ));
}

#[test]
fn test_invalid_number_is_rejected() {
    let err = parse(&["-t", "t", "-m", "soon"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValueValidation);
}

#[test]
fn test_zero_sampling_rate_is_rejected() {
    let err = parse(&["-t", "t", "-m", "0"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValueValidation);
    assert_eq!(err.exit_code(), 2);

    assert_eq!(parse(&["-t", "t", "-m", "1"]).unwrap().sampling_rate_ms, 1);
}

#[test]
fn test_send_backoff_feeds_retry_policy() {
    let cli = parse(&["-t", "t", "--send-backoff-ms", "250"]).unwrap();

    let policy = cli.forwarder_config().retry_policy;
    assert_eq!(policy.initial_backoff, Duration::from_millis(250));
    assert_eq!(policy.base_backoff(2), Duration::from_millis(500));
}

#[test]
fn test_cli_options_feed_configuration() {
    let cli = parse(&["-b", "broker1:9092", "-t", "sensor-data", "-c", "bridge"]).unwrap();

    let set = ConfigurationSet::assemble(&cli.consumer_options()).unwrap();

    assert_eq!(set.get("bootstrap.servers"), Some(&"broker1:9092".into()));
    assert_eq!(set.get("group.id"), Some(&"bridge".into()));
}
