//! Startup sequence and the process lifetime of the pipeline

use crate::cli::Cli;
use crate::consumer::{
    transform_for, ConfigurationSet, ForwardStats, Forwarder, KafkaSubscription,
};
use crate::error::BridgeResult;
use crate::iothub::{ConnectionString, EventSink, IotHubClient, TransportSettings};
use crate::runtime::RuntimeContext;

use std::sync::Arc;
use tracing::info;

/// Run the bridge until the runtime's shutdown signal is set
///
/// Every fatal startup condition is checked before the Kafka client is
/// created: connection string, edge certificate, transport name and the
/// consumer configuration.
pub async fn run(cli: &Cli, runtime: &RuntimeContext) -> BridgeResult<ForwardStats> {
    let connection: ConnectionString = runtime.connection_string()?.parse()?;
    let protocol = cli.transport_protocol()?;
    let trust_anchor = runtime.edge_trust_anchor()?;

    let options = cli.consumer_options();
    let config = ConfigurationSet::assemble(&options)?;

    let client = Arc::new(
        IotHubClient::connect(
            connection,
            TransportSettings {
                protocol,
                trust_anchor,
                ..Default::default()
            },
        )
        .await?,
    );

    let subscription = KafkaSubscription::subscribe(&config, &options.topics)?;
    let state = subscription.state();

    let sink: Arc<dyn EventSink> = client.clone();
    let stats = Forwarder::new(subscription, sink, runtime, cli.forwarder_config())
        .with_transform(transform_for(cli.flatten))
        .run()
        .await;

    client.close().await;
    info!(
        mode = ?runtime.mode(),
        rebalances = state.lock().rebalance_count(),
        "Bridge stopped"
    );
    Ok(stats)
}
