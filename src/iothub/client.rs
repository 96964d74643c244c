//! MQTT transport to IoT Hub or the IoT Edge hub

use crate::consumer::processor::OutboundEvent;
use crate::error::{BridgeError, BridgeResult};
use crate::iothub::connection_string::ConnectionString;
use crate::iothub::sas::{default_token_ttl, generate_sas_token};
use crate::iothub::EventSink;

use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS,
    TlsConfiguration, Transport,
};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const MQTT_TLS_PORT: u16 = 8883;
const MQTT_WSS_PORT: u16 = 443;
const MAX_PACKET_SIZE: usize = 256 * 1024;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport protocol names accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportProtocol {
    /// MQTT over TLS on port 8883
    #[default]
    MqttTcpOnly,
    /// MQTT over secure WebSockets on port 443
    MqttWebSocketOnly,
}

impl FromStr for TransportProtocol {
    type Err = BridgeError;

    fn from_str(s: &str) -> BridgeResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mqtt" | "mqtt_tcp_only" => Ok(Self::MqttTcpOnly),
            "mqtt_websocket_only" => Ok(Self::MqttWebSocketOnly),
            _ => Err(BridgeError::UnsupportedTransport(s.to_string())),
        }
    }
}

/// How to reach the ingestion endpoint
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// MQTT over TLS or over secure WebSockets
    pub protocol: TransportProtocol,
    /// PEM CA certificate to trust instead of the platform roots
    pub trust_anchor: Option<Vec<u8>>,
    /// Lifetime of each SAS token; a new one is signed on every reconnect
    pub token_ttl: chrono::Duration,
    /// MQTT keep-alive interval
    pub keep_alive: Duration,
    /// How long a send waits for the hub to acknowledge the publish
    pub ack_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            protocol: TransportProtocol::default(),
            trust_anchor: None,
            token_ttl: default_token_ttl(),
            keep_alive: Duration::from_secs(60),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }
}

/// Build the MQTT options for a connection string and transport
pub fn mqtt_options(
    connection: &ConnectionString,
    settings: &TransportSettings,
) -> BridgeResult<MqttOptions> {
    let host = connection.connect_host();
    let mut options = match settings.protocol {
        TransportProtocol::MqttTcpOnly => {
            MqttOptions::new(connection.client_id(), host, MQTT_TLS_PORT)
        }
        TransportProtocol::MqttWebSocketOnly => MqttOptions::new(
            connection.client_id(),
            format!("wss://{}:{}/$iothub/websocket", host, MQTT_WSS_PORT),
            MQTT_WSS_PORT,
        ),
    };

    let transport = match (&settings.trust_anchor, settings.protocol) {
        (Some(ca), TransportProtocol::MqttTcpOnly) => Transport::tls_with_config(simple_tls(ca)),
        (Some(ca), TransportProtocol::MqttWebSocketOnly) => {
            Transport::wss_with_config(simple_tls(ca))
        }
        (None, TransportProtocol::MqttTcpOnly) => Transport::tls_with_default_config(),
        (None, TransportProtocol::MqttWebSocketOnly) => Transport::wss_with_default_config(),
    };

    options
        .set_keep_alive(settings.keep_alive)
        .set_clean_session(false)
        .set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE)
        .set_transport(transport);
    refresh_credentials(&mut options, connection, settings.token_ttl)?;

    Ok(options)
}

/// Sign a new SAS token valid for `ttl` and use it as the MQTT password
pub fn refresh_credentials(
    options: &mut MqttOptions,
    connection: &ConnectionString,
    ttl: chrono::Duration,
) -> BridgeResult<()> {
    let token = generate_sas_token(
        &connection.resource_uri(),
        connection.shared_access_key(),
        Utc::now() + ttl,
    )?;
    options.set_credentials(connection.username(), token);
    Ok(())
}

/// Reject a publish the event loop would refuse as too large
///
/// Counts the fixed header, topic, packet id and body of a QoS 1 PUBLISH.
fn check_publish_size(topic: &str, body_len: usize) -> BridgeResult<()> {
    let remaining = 2 + topic.len() + 2 + body_len;
    let length_bytes = match remaining {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    };
    let size = 1 + length_bytes + remaining;

    if size > MAX_PACKET_SIZE {
        return Err(BridgeError::EventTooLarge {
            size,
            limit: MAX_PACKET_SIZE,
        });
    }
    Ok(())
}

fn simple_tls(ca: &[u8]) -> TlsConfiguration {
    TlsConfiguration::Simple {
        ca: ca.to_vec(),
        alpn: None,
        client_auth: None,
    }
}

/// Connected ingestion client
///
/// A background task drives the MQTT event loop and hands publish
/// acknowledgements back to [`EventSink::send_event`]. Sends are serialized,
/// so at most one event is in flight. A send that is not acknowledged
/// within the ack timeout fails with a retryable error.
pub struct IotHubClient {
    client: AsyncClient,
    connection: ConnectionString,
    acks: Mutex<mpsc::Receiver<u16>>,
    driver: JoinHandle<()>,
    ack_timeout: Duration,
}

impl IotHubClient {
    /// Open the connection and wait for the broker to accept it
    pub async fn connect(
        connection: ConnectionString,
        settings: TransportSettings,
    ) -> BridgeResult<Self> {
        let options = mqtt_options(&connection, &settings)?;
        let (client, eventloop) = AsyncClient::new(options, 16);
        let (connected_tx, connected_rx) = oneshot::channel();
        let (ack_tx, ack_rx) = mpsc::channel(16);

        let driver = tokio::spawn(drive(
            eventloop,
            connection.clone(),
            settings.token_ttl,
            connected_tx,
            ack_tx,
        ));

        match connected_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                driver.abort();
                return Err(BridgeError::ConnectionError(reason));
            }
            Err(_) => {
                return Err(BridgeError::ConnectionError(
                    "connection task stopped before connecting".to_string(),
                ))
            }
        }

        info!(
            host = connection.connect_host(),
            device_id = connection.device_id(),
            module_id = connection.module_id().unwrap_or("-"),
            protocol = ?settings.protocol,
            "IoT Hub module client initialized."
        );

        Ok(Self::from_parts(
            client,
            connection,
            ack_rx,
            driver,
            settings.ack_timeout,
        ))
    }

    fn from_parts(
        client: AsyncClient,
        connection: ConnectionString,
        acks: mpsc::Receiver<u16>,
        driver: JoinHandle<()>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            client,
            connection,
            acks: Mutex::new(acks),
            driver,
            ack_timeout,
        }
    }

    /// Disconnect and stop the event loop task
    pub async fn close(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "Disconnect request not delivered");
        }
        self.driver.abort();
        info!("IoT Hub client closed");
    }
}

impl Drop for IotHubClient {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl EventSink for IotHubClient {
    async fn send_event(&self, event: OutboundEvent) -> BridgeResult<()> {
        let topic = self.connection.telemetry_topic(event.output.as_deref());
        check_publish_size(&topic, event.body.len())?;
        let mut acks = self.acks.lock().await;

        // Late acks from an earlier timed-out attempt
        while acks.try_recv().is_ok() {}

        self.client
            .publish(topic, QoS::AtLeastOnce, false, event.body.to_vec())
            .await
            .map_err(|e| BridgeError::SendError(e.to_string()))?;

        match tokio::time::timeout(self.ack_timeout, acks.recv()).await {
            Ok(Some(pkid)) => {
                debug!(pkid, "Event acknowledged");
                Ok(())
            }
            Ok(None) => Err(BridgeError::ConnectionError(
                "IoT Hub connection closed".to_string(),
            )),
            Err(_) => Err(BridgeError::SendError(format!(
                "no acknowledgement within {:?}",
                self.ack_timeout
            ))),
        }
    }
}

async fn drive(
    mut eventloop: EventLoop,
    connection: ConnectionString,
    token_ttl: chrono::Duration,
    connected: oneshot::Sender<Result<(), String>>,
    acks: mpsc::Sender<u16>,
) {
    let mut connected = Some(connected);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    debug!("MQTT session established");
                    if let Some(tx) = connected.take() {
                        let _ = tx.send(Ok(()));
                    }
                } else if let Some(tx) = connected.take() {
                    let _ = tx.send(Err(format!("connection refused: {:?}", ack.code)));
                    return;
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                if acks.try_send(ack.pkid).is_err() {
                    warn!(pkid = ack.pkid, "Unclaimed publish acknowledgement");
                }
            }
            Ok(_) => {}
            Err(e) => {
                if let Some(tx) = connected.take() {
                    let _ = tx.send(Err(e.to_string()));
                    return;
                }
                if acks.is_closed() {
                    return;
                }
                warn!(error = %e, "IoT Hub connection error, reconnecting");
                // The hub drops the session once the token expires
                if let Err(e) =
                    refresh_credentials(&mut eventloop.mqtt_options, &connection, token_ttl)
                {
                    warn!(error = %e, "Could not renew SAS token");
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn connection() -> ConnectionString {
        "HostName=myhub.azure-devices.net;GatewayHostName=edgehub;DeviceId=edge-01;\
         ModuleId=kafka;SharedAccessKey=a2V5"
            .parse()
            .unwrap()
    }

    #[rstest]
    #[case("Mqtt_Tcp_Only", TransportProtocol::MqttTcpOnly)]
    #[case("Mqtt", TransportProtocol::MqttTcpOnly)]
    #[case("mqtt_tcp_only", TransportProtocol::MqttTcpOnly)]
    #[case("Mqtt_WebSocket_Only", TransportProtocol::MqttWebSocketOnly)]
    fn test_protocol_names(#[case] name: &str, #[case] expected: TransportProtocol) {
        assert_eq!(name.parse::<TransportProtocol>().unwrap(), expected);
    }

    #[rstest]
    #[case("Amqp")]
    #[case("Amqp_Tcp_Only")]
    #[case("Amqp_WebSocket_Only")]
    #[case("Http1")]
    #[case("carrier-pigeon")]
    fn test_unsupported_protocols(#[case] name: &str) {
        assert!(matches!(
            name.parse::<TransportProtocol>(),
            Err(BridgeError::UnsupportedTransport(_))
        ));
    }

    #[test]
    fn test_tls_options_target_gateway() {
        let options = mqtt_options(&connection(), &TransportSettings::default()).unwrap();

        assert_eq!(options.client_id(), "edge-01/kafka");
        assert_eq!(
            options.broker_address(),
            ("edgehub".to_string(), MQTT_TLS_PORT)
        );
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
    }

    #[test]
    fn test_websocket_options() {
        let settings = TransportSettings {
            protocol: TransportProtocol::MqttWebSocketOnly,
            trust_anchor: Some(b"-----BEGIN CERTIFICATE-----".to_vec()),
            ..Default::default()
        };
        let options = mqtt_options(&connection(), &settings).unwrap();

        assert_eq!(
            options.broker_address(),
            (
                "wss://edgehub:443/$iothub/websocket".to_string(),
                MQTT_WSS_PORT
            )
        );
    }

    fn token_expiry(options: &MqttOptions) -> i64 {
        let (_, token) = options.credentials().unwrap();
        token
            .rsplit_once("se=")
            .and_then(|(_, se)| se.parse().ok())
            .unwrap()
    }

    #[test]
    fn test_credentials_are_renewed() {
        let connection = connection();
        let mut options = mqtt_options(&connection, &TransportSettings::default()).unwrap();
        let first = token_expiry(&options);
        let now = Utc::now().timestamp();
        assert!((first - (now + 24 * 3600)).abs() <= 5);

        refresh_credentials(&mut options, &connection, chrono::Duration::hours(48)).unwrap();

        let (username, token) = options.credentials().unwrap();
        assert_eq!(username, connection.username());
        assert!(token.starts_with("SharedAccessSignature sr="));
        assert!(token_expiry(&options) >= first + 24 * 3600);
    }

    #[test]
    fn test_publish_size_limit() {
        let topic = connection().telemetry_topic(None);
        let overhead = 1 + 3 + 2 + topic.len() + 2;

        assert!(check_publish_size(&topic, MAX_PACKET_SIZE - overhead).is_ok());
        assert!(matches!(
            check_publish_size(&topic, MAX_PACKET_SIZE - overhead + 1),
            Err(BridgeError::EventTooLarge { limit: MAX_PACKET_SIZE, .. })
        ));
    }

    /// Client whose acknowledgements come from the test instead of a broker
    fn detached_client(ack_timeout: Duration) -> (IotHubClient, EventLoop, mpsc::Sender<u16>) {
        let options = MqttOptions::new("edge-01/kafka", "localhost", 1883);
        let (client, eventloop) = AsyncClient::new(options, 16);
        let (ack_tx, ack_rx) = mpsc::channel(16);
        let driver = tokio::spawn(std::future::pending::<()>());
        let sink = IotHubClient::from_parts(client, connection(), ack_rx, driver, ack_timeout);
        (sink, eventloop, ack_tx)
    }

    fn event(body: &'static [u8]) -> OutboundEvent {
        OutboundEvent::new(body, None)
    }

    #[tokio::test]
    async fn test_send_completes_on_ack() {
        let (sink, _eventloop, ack_tx) = detached_client(Duration::from_secs(5));
        // Stale ack from an earlier attempt is discarded
        ack_tx.send(7).await.unwrap();

        let acker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ack_tx.send(1).await.unwrap();
            ack_tx
        });

        sink.send_event(event(b"23.5")).await.unwrap();
        acker.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_without_ack_times_out() {
        let (sink, _eventloop, _ack_tx) = detached_client(Duration::from_millis(50));

        let err = sink.send_event(event(b"23.5")).await.unwrap_err();

        assert!(matches!(err, BridgeError::SendError(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_send_after_connection_loss_fails() {
        let (sink, _eventloop, ack_tx) = detached_client(Duration::from_secs(5));
        drop(ack_tx);

        let err = sink.send_event(event(b"23.5")).await.unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionError(_)));
    }

    #[tokio::test]
    async fn test_oversized_event_is_rejected_before_publish() {
        let (sink, _eventloop, _ack_tx) = detached_client(Duration::from_secs(5));
        let body = OutboundEvent::new(vec![0u8; MAX_PACKET_SIZE], None);

        let err = sink.send_event(body).await.unwrap_err();

        assert!(matches!(err, BridgeError::EventTooLarge { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_bad_key_fails_before_connecting() {
        let connection: ConnectionString = "HostName=h;DeviceId=d;SharedAccessKey=%%%"
            .parse()
            .unwrap();
        assert!(mqtt_options(&connection, &TransportSettings::default()).is_err());
    }
}
