//! Main entry point for the Tenure server.

use tenure_server::{
    config::Configuration,
    startup::{self, LockNode},
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;
    startup::init_logging(&configuration.log_level())?;

    tenure_server::metrics::init_metrics();
    if configuration.metrics_enabled() {
        tenure_server::metrics::install_prometheus_exporter(configuration.metrics_port())?;
        info!(
            "Prometheus metrics exposed on port {}",
            configuration.metrics_port()
        );
    }

    let node = LockNode::build(&configuration)?;
    let shutdown = startup::wait_for_shutdown_signal();
    let mut shutdown_rx = shutdown.subscribe();
    let handles = node.start(&shutdown);
    info!(
        "Tenure node {} started with {} acceptor(s)",
        node.election().leader_id(),
        node.acceptors().len()
    );

    let _ = shutdown_rx.recv().await;
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }
    info!("Tenure node stopped");
    Ok(())
}
