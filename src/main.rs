use anyhow::Context;
use clap::Parser;
use kafka_iothub_bridge::consumer::ShutdownCoordinator;
use kafka_iothub_bridge::telemetry::init_logging;
use kafka_iothub_bridge::{bridge, Cli, RuntimeContext, VERSION};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.logging_config()).context("failed to initialize logging")?;
    info!(version = VERSION, "Starting kafka-iothub-bridge");

    let runtime = RuntimeContext::from_env();
    let listener = ShutdownCoordinator::new(runtime.shutdown()).spawn();

    let result = bridge::run(&cli, &runtime).await;

    listener.abort();

    match result {
        Ok(stats) => {
            info!(
                forwarded = stats.forwarded,
                dropped = stats.dropped,
                "Shutdown complete"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, severity = ?e.severity(), "Bridge failed to start");
            Err(e).context("kafka-iothub-bridge stopped")
        }
    }
}
