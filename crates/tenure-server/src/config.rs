//! Configuration management for the Tenure server
//!
//! Sources, later ones winning: the YAML file, `TENURE__*` environment
//! variables, command line flags.

use clap::Parser;
use config::{Config, Environment};
use tenure_consistency::{DEFAULT_NO_QUORUM_MAX_DELAY_MS, LockServiceConfig};

pub const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";
pub const DEFAULT_NODE_ID: &str = "node-1";
pub const DEFAULT_PING_RATE_MS: u64 = 5000;
pub const DEFAULT_RANDOM_WAIT_MS: i64 = 1000;
pub const DEFAULT_LEADER_PING_RESPONSE_WAIT_MS: u64 = 5000;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_METRICS_PORT: u16 = 9464;

const NODE_ID: &str = "tenure.node.id";
const ACCEPTORS: &str = "tenure.election.acceptors";
const LOG_LEVEL: &str = "tenure.log.level";

/// Command line arguments for the server
#[derive(Debug, Parser)]
#[command(version, about = "Tenure lock and leader election node")]
pub struct Cli {
    #[arg(long = "node-id")]
    pub node_id: Option<String>,
    /// Number of in-process acceptors
    #[arg(long = "acceptors")]
    pub acceptors: Option<u32>,
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn new() -> anyhow::Result<Self> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let mut config_builder = Config::builder()
            .add_source(config::File::with_name(&cli.config).required(false))
            .add_source(
                Environment::with_prefix("tenure")
                    .separator("__")
                    .keep_prefix(true)
                    .try_parsing(true),
            );

        if let Some(v) = cli.node_id {
            config_builder = config_builder.set_override(NODE_ID, v)?;
        }
        if let Some(v) = cli.acceptors {
            config_builder = config_builder.set_override(ACCEPTORS, i64::from(v))?;
        }
        if let Some(v) = cli.log_level {
            config_builder = config_builder.set_override(LOG_LEVEL, v)?;
        }

        Ok(Configuration {
            config: config_builder.build()?,
        })
    }

    pub fn from_config(config: Config) -> Self {
        Configuration { config }
    }

    // ========================================================================
    // Node
    // ========================================================================

    pub fn node_id(&self) -> String {
        self.config
            .get_string(NODE_ID)
            .unwrap_or(DEFAULT_NODE_ID.to_string())
    }

    // ========================================================================
    // Leader election
    // ========================================================================

    pub fn acceptor_count(&self) -> usize {
        self.config.get_int(ACCEPTORS).unwrap_or(1).max(1) as usize
    }

    pub fn ping_rate_ms(&self) -> u64 {
        self.config
            .get_int("tenure.election.ping_rate_ms")
            .map(|v| v.max(1) as u64)
            .unwrap_or(DEFAULT_PING_RATE_MS)
    }

    /// Passed to the election builder unchecked; negative values are
    /// rejected there.
    pub fn random_wait_ms(&self) -> i64 {
        self.config
            .get_int("tenure.election.random_wait_ms")
            .unwrap_or(DEFAULT_RANDOM_WAIT_MS)
    }

    pub fn leader_ping_response_wait_ms(&self) -> u64 {
        self.config
            .get_int("tenure.election.leader_ping_response_wait_ms")
            .map(|v| v.max(0) as u64)
            .unwrap_or(DEFAULT_LEADER_PING_RESPONSE_WAIT_MS)
    }

    pub fn no_quorum_max_delay_ms(&self) -> i64 {
        self.config
            .get_int("tenure.election.no_quorum_max_delay_ms")
            .unwrap_or(DEFAULT_NO_QUORUM_MAX_DELAY_MS)
    }

    pub fn only_log_on_quorum_failure(&self) -> bool {
        self.config
            .get_bool("tenure.election.only_log_on_quorum_failure")
            .unwrap_or(true)
    }

    // ========================================================================
    // Lock service
    // ========================================================================

    pub fn lock_service_config(&self) -> LockServiceConfig {
        let defaults = LockServiceConfig::default();
        LockServiceConfig {
            default_lock_timeout_ms: self
                .config
                .get_int("tenure.lock.default_timeout_ms")
                .map(|v| v.max(0) as u64)
                .unwrap_or(defaults.default_lock_timeout_ms),
            maintenance_interval_ms: self
                .config
                .get_int("tenure.lock.maintenance_interval_ms")
                .map(|v| v.max(1) as u64)
                .unwrap_or(defaults.maintenance_interval_ms),
        }
    }

    // ========================================================================
    // Observability
    // ========================================================================

    pub fn log_level(&self) -> String {
        self.config
            .get_string(LOG_LEVEL)
            .unwrap_or(DEFAULT_LOG_LEVEL.to_string())
    }

    pub fn metrics_enabled(&self) -> bool {
        self.config.get_bool("tenure.metrics.enabled").unwrap_or(false)
    }

    pub fn metrics_port(&self) -> u16 {
        self.config
            .get_int("tenure.metrics.port")
            .ok()
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(DEFAULT_METRICS_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_yaml(yaml: &str) -> Configuration {
        Configuration::from_config(
            Config::builder()
                .add_source(config::File::from_str(yaml, FileFormat::Yaml))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_defaults() {
        let configuration = Configuration::default();
        assert_eq!(configuration.node_id(), DEFAULT_NODE_ID);
        assert_eq!(configuration.acceptor_count(), 1);
        assert_eq!(configuration.ping_rate_ms(), DEFAULT_PING_RATE_MS);
        assert_eq!(configuration.random_wait_ms(), DEFAULT_RANDOM_WAIT_MS);
        assert_eq!(
            configuration.no_quorum_max_delay_ms(),
            DEFAULT_NO_QUORUM_MAX_DELAY_MS
        );
        assert!(configuration.only_log_on_quorum_failure());
        assert_eq!(configuration.lock_service_config(), LockServiceConfig::default());
        assert_eq!(configuration.log_level(), "info");
        assert!(!configuration.metrics_enabled());
    }

    #[test]
    fn test_yaml_values() {
        let configuration = from_yaml(
            r#"
tenure:
  node:
    id: node-7
  election:
    acceptors: 5
    ping_rate_ms: 250
    random_wait_ms: -1
    only_log_on_quorum_failure: false
  lock:
    default_timeout_ms: 30000
  metrics:
    enabled: true
    port: 9100
"#,
        );
        assert_eq!(configuration.node_id(), "node-7");
        assert_eq!(configuration.acceptor_count(), 5);
        assert_eq!(configuration.ping_rate_ms(), 250);
        assert_eq!(configuration.random_wait_ms(), -1);
        assert!(!configuration.only_log_on_quorum_failure());
        assert_eq!(
            configuration.lock_service_config().default_lock_timeout_ms,
            30000
        );
        assert_eq!(configuration.lock_service_config().maintenance_interval_ms, 1000);
        assert!(configuration.metrics_enabled());
        assert_eq!(configuration.metrics_port(), 9100);
    }

    #[test]
    fn test_out_of_range_metrics_port_uses_default() {
        let configuration = from_yaml(
            r#"
tenure:
  metrics:
    port: 70000
"#,
        );
        assert_eq!(configuration.metrics_port(), DEFAULT_METRICS_PORT);

        let configuration = from_yaml(
            r#"
tenure:
  metrics:
    port: -1
"#,
        );
        assert_eq!(configuration.metrics_port(), DEFAULT_METRICS_PORT);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "tenure-server",
            "--node-id",
            "node-9",
            "--acceptors",
            "3",
            "--log-level",
            "debug",
            "--config",
            "does/not/exist.yml",
        ]);
        let configuration = Configuration::from_cli(cli).unwrap();
        assert_eq!(configuration.node_id(), "node-9");
        assert_eq!(configuration.acceptor_count(), 3);
        assert_eq!(configuration.log_level(), "debug");
    }
}
