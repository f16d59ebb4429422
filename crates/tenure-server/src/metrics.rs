// Metrics module for observability
// Describes the counters and gauges the election loop and lock service emit

use std::net::{Ipv4Addr, SocketAddrV4};

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize all metric descriptions
/// Should be called once at application startup
pub fn init_metrics() {
    // Leader election metrics
    describe_counter!(
        "tenure_leadership_proposals_total",
        "Total number of leadership proposals started by this node"
    );
    describe_counter!(
        "tenure_leadership_gained_total",
        "Total number of times this node became leader"
    );
    describe_counter!(
        "tenure_leadership_lost_total",
        "Total number of times this node stopped leading"
    );
    describe_counter!(
        "tenure_quorum_failures_total",
        "Total number of times an acceptor quorum could not be reached"
    );
    describe_counter!(
        "tenure_leader_ping_failures_total",
        "Total number of unanswered pings to the suspected leader"
    );

    // Lock service metrics
    describe_gauge!(
        "tenure_held_lock_tokens",
        "Number of lock tokens held in the current leadership term"
    );
}

/// Installs the Prometheus recorder with a scrape endpoint on `port`.
pub fn install_prometheus_exporter(port: u16) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
        .install()?;
    Ok(())
}
