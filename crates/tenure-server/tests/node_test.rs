//! Tenure Server Node Tests
//!
//! Assembles a node from configuration and drives it end to end.

use std::time::Duration;

use config::{Config, FileFormat};
use tenure_common::{LockDescriptor, LockRequest, RemoteLockService, TenureError};
use tenure_consistency::LeadershipState;
use tenure_server::config::Configuration;
use tenure_server::startup::{LockNode, ShutdownSignal};

fn configuration(yaml: &str) -> Configuration {
    Configuration::from_config(
        Config::builder()
            .add_source(config::File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap(),
    )
}

const FAST: &str = r#"
tenure:
  node:
    id: node-a
  election:
    acceptors: 3
    ping_rate_ms: 20
    random_wait_ms: 0
    leader_ping_response_wait_ms: 20
    no_quorum_max_delay_ms: 0
    only_log_on_quorum_failure: false
  lock:
    maintenance_interval_ms: 10
"#;

fn request(name: &str) -> LockRequest {
    LockRequest::builder([LockDescriptor::from(name)])
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_node_serves_locks_once_leading() {
    let node = LockNode::build(&configuration(FAST)).unwrap();
    assert_eq!(node.acceptors().len(), 3);
    assert_eq!(node.election().quorum_size(), 2);

    let client = node.client();
    let err = client.lock_anonymously(request("a")).await.unwrap_err();
    assert!(matches!(err, TenureError::NotCurrentLeader { .. }));

    assert_eq!(node.election().tick().await, LeadershipState::Leading);
    let response = client.lock_with_client("worker-1", request("a")).await.unwrap();
    assert!(response.success());

    let token = response.token.unwrap();
    assert_eq!(client.refresh(&[token.clone()]).await.unwrap().len(), 1);
    assert!(client.unlock(&token).await.unwrap());
}

#[tokio::test]
async fn test_node_loop_elects_and_stops() {
    let node = LockNode::build(&configuration(FAST)).unwrap();
    let shutdown = ShutdownSignal::new();
    let handles = node.start(&shutdown);

    let mut status = node.election().subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| s.state == LeadershipState::Leading),
    )
    .await
    .unwrap()
    .unwrap();

    node.client()
        .lock_anonymously(request("a"))
        .await
        .unwrap();
    assert_eq!(node.lock_service().held_token_count(), 1);

    shutdown.shutdown();
    for handle in handles {
        handle.await.unwrap();
    }
    assert!(!node.election().is_currently_leading());
}

#[tokio::test]
async fn test_invalid_election_settings_fail_assembly() {
    let result = LockNode::build(&configuration(
        r#"
tenure:
  election:
    random_wait_ms: -1
"#,
    ));
    let err = result.err().unwrap();
    assert!(err.to_string().contains("randomWaitBeforeProposingLeadershipMs"));
}
