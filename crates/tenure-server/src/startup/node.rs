//! Standalone node assembly
//!
//! Wires in-process acceptors and a learner into the election service, puts
//! the leader lock service behind it and exposes both through a router.

use std::sync::Arc;

use tenure_client::LockRequestRouter;
use tenure_common::RemoteLockService;
use tenure_consistency::leader::memory::{LocalAcceptor, LocalLearner, QuorumProposer};
use tenure_consistency::leader::paxos::{PaxosAcceptor, PaxosLearner};
use tenure_consistency::{LeaderElectionService, LeaderLockService, TracingEventRecorder};
use tokio::task::JoinHandle;
use tracing::info;

use super::shutdown::ShutdownSignal;
use crate::config::Configuration;

pub struct LockNode {
    acceptors: Vec<Arc<LocalAcceptor>>,
    election: Arc<LeaderElectionService>,
    lock_service: Arc<LeaderLockService>,
    client: Arc<LockRequestRouter>,
}

impl LockNode {
    /// Must be called inside a tokio runtime; the election loop runs on it.
    pub fn build(configuration: &Configuration) -> anyhow::Result<Self> {
        let node_id = configuration.node_id();
        let acceptors: Vec<Arc<LocalAcceptor>> = (0..configuration.acceptor_count())
            .map(|i| Arc::new(LocalAcceptor::new(format!("{}-acceptor-{}", node_id, i))))
            .collect();
        let dyn_acceptors: Vec<Arc<dyn PaxosAcceptor>> = acceptors
            .iter()
            .map(|a| a.clone() as Arc<dyn PaxosAcceptor>)
            .collect();
        let knowledge = Arc::new(LocalLearner::new());
        let learners = vec![knowledge.clone() as Arc<dyn PaxosLearner>];
        let proposer = Arc::new(QuorumProposer::new(
            node_id.clone(),
            dyn_acceptors.clone(),
            learners.clone(),
        ));

        let only_log_on_quorum_failure = configuration.only_log_on_quorum_failure();
        let election = Arc::new(
            LeaderElectionService::builder()
                .proposer(proposer)
                .knowledge(knowledge)
                .acceptors(dyn_acceptors)
                .learners(learners)
                .ping_rate_ms(configuration.ping_rate_ms())
                .random_wait_before_proposing_leadership_ms(configuration.random_wait_ms())
                .leader_ping_response_wait_ms(configuration.leader_ping_response_wait_ms())
                .no_quorum_max_delay_ms(configuration.no_quorum_max_delay_ms())
                .event_recorder(Arc::new(TracingEventRecorder))
                .only_log_on_quorum_failure(move || only_log_on_quorum_failure)
                .build()?,
        );

        let lock_service = Arc::new(LeaderLockService::new(
            election.clone(),
            configuration.lock_service_config(),
        ));
        // Both traffic classes reach the same in-process service here; a
        // networked client would hand the router two separate connections.
        let client = Arc::new(LockRequestRouter::new(
            lock_service.clone(),
            lock_service.clone(),
        ));

        info!(
            node_id = %node_id,
            acceptors = acceptors.len(),
            quorum = election.quorum_size(),
            "Lock node assembled"
        );
        Ok(Self {
            acceptors,
            election,
            lock_service,
            client,
        })
    }

    pub fn acceptors(&self) -> &[Arc<LocalAcceptor>] {
        &self.acceptors
    }

    pub fn election(&self) -> &Arc<LeaderElectionService> {
        &self.election
    }

    pub fn lock_service(&self) -> &Arc<LeaderLockService> {
        &self.lock_service
    }

    pub fn client(&self) -> Arc<dyn RemoteLockService> {
        self.client.clone()
    }

    /// Starts the election loop and the lock maintenance sweep.
    pub fn start(&self, shutdown: &ShutdownSignal) -> Vec<JoinHandle<()>> {
        vec![
            self.election.start(shutdown.subscribe()),
            self.lock_service.spawn_maintenance(shutdown.subscribe()),
        ]
    }
}
