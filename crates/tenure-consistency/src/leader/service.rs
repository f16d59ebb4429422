//! Paxos leader election service
//!
//! One election-loop iteration (`tick`) decides this node's `LeadershipState`:
//!
//! 1. Catch the local learner up with the greatest value any learner knows.
//! 2. If that value names this node, confirm an acceptor quorum still answers
//!    and nobody prepared a newer round.
//! 3. If it names a peer, ping the peer and follow it while it answers.
//! 4. Otherwise back off randomly and propose this node for the next round.
//!
//! The state is single-writer (ticks are serialized) and published through a
//! watch channel for the lock layer to read.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tenure_common::{LeadershipToken, Result, TenureError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::{LeaderElectionConfig, LeaderElectionServiceBuilder};
use super::paxos::{PaxosValue, PingableLeader};
use crate::lock::LeadershipView;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadershipState {
    NotLeading,
    Electing,
    Leading,
}

impl std::fmt::Display for LeadershipState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeadershipState::NotLeading => write!(f, "NOT_LEADING"),
            LeadershipState::Electing => write!(f, "ELECTING"),
            LeadershipState::Leading => write!(f, "LEADING"),
        }
    }
}

/// Answer to "is this token still the current term?"
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StillLeadingStatus {
    Leading,
    NotLeading,
    NoQuorum,
}

/// Published leadership view
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeadershipSnapshot {
    pub state: LeadershipState,
    /// Set only while `Leading`
    pub token: Option<LeadershipToken>,
    pub suspected_leader: Option<String>,
}

impl LeadershipSnapshot {
    fn not_leading(suspected_leader: Option<String>) -> Self {
        Self {
            state: LeadershipState::NotLeading,
            token: None,
            suspected_leader,
        }
    }
}

enum QuorumCheck {
    Confirmed,
    NoQuorum { reachable: usize, required: usize },
    Superseded { latest: u64 },
}

pub struct LeaderElectionService {
    config: LeaderElectionConfig,
    leader_id: String,
    status: watch::Sender<LeadershipSnapshot>,
    /// When the current leader first failed to reach a quorum
    quorum_lost_since: Mutex<Option<Instant>>,
    tick_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for LeaderElectionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElectionService")
            .field("leader_id", &self.leader_id)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

impl LeaderElectionService {
    pub fn builder() -> LeaderElectionServiceBuilder {
        LeaderElectionServiceBuilder::new()
    }

    pub fn new(config: LeaderElectionConfig) -> Self {
        let leader_id = config.proposer().proposer_id().to_string();
        let (status, _) = watch::channel(LeadershipSnapshot::not_leading(None));
        info!(
            leader_id = %leader_id,
            acceptors = config.acceptors().len(),
            quorum = config.quorum_size(),
            "Leader election service created"
        );
        Self {
            config,
            leader_id,
            status,
            quorum_lost_since: Mutex::new(None),
            tick_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &LeaderElectionConfig {
        &self.config
    }

    /// Identity of this node
    pub fn leader_id(&self) -> &str {
        &self.leader_id
    }

    pub fn quorum_size(&self) -> usize {
        self.config.quorum_size()
    }

    pub fn snapshot(&self) -> LeadershipSnapshot {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> LeadershipState {
        self.status.borrow().state
    }

    pub fn subscribe(&self) -> watch::Receiver<LeadershipSnapshot> {
        self.status.subscribe()
    }

    pub fn is_currently_leading(&self) -> bool {
        self.state() == LeadershipState::Leading
    }

    pub fn leadership_token(&self) -> Option<LeadershipToken> {
        self.status.borrow().token.clone()
    }

    pub fn suspected_leader(&self) -> Option<String> {
        self.status.borrow().suspected_leader.clone()
    }

    /// `(leader id, address)` of every peer
    pub fn potential_leaders(&self) -> Vec<(String, String)> {
        self.config
            .potential_leaders()
            .iter()
            .map(|p| (p.leader_id().to_string(), p.address.clone()))
            .collect()
    }

    /// Re-validates `token` against the acceptors.
    pub async fn is_still_leading(&self, token: &LeadershipToken) -> StillLeadingStatus {
        if self.leadership_token().as_ref() != Some(token) {
            return StillLeadingStatus::NotLeading;
        }
        match self.confirm_quorum(token.round).await {
            QuorumCheck::Confirmed => StillLeadingStatus::Leading,
            QuorumCheck::NoQuorum { .. } => StillLeadingStatus::NoQuorum,
            QuorumCheck::Superseded { .. } => StillLeadingStatus::NotLeading,
        }
    }

    /// Spawns the election loop on the `leader-election` executor. It ticks
    /// every `ping_rate_ms` until `shutdown` fires.
    pub fn start(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let service = self.clone();
        let ping_rate = self.config.ping_rate();
        self.config.executor("leader-election").spawn(async move {
            info!(leader_id = %service.leader_id, "Leader election loop started");
            loop {
                let state = service.tick().await;
                debug!(state = %state, "Election tick finished");
                tokio::select! {
                    _ = tokio::time::sleep(ping_rate) => {}
                    _ = shutdown.recv() => break,
                }
            }
            service.transition(LeadershipSnapshot::not_leading(None));
            info!(leader_id = %service.leader_id, "Leader election loop stopped");
        })
    }

    /// Runs one iteration of the election protocol.
    pub async fn tick(&self) -> LeadershipState {
        let _guard = self.tick_lock.lock().await;

        self.catch_up_knowledge().await;
        match self.greatest_learned_value().await {
            Some(value) if value.leader_id == self.leader_id => {
                self.check_own_leadership(&value).await
            }
            Some(value) => {
                if self.ping_leader(&value.leader_id).await {
                    self.follow(&value);
                    LeadershipState::NotLeading
                } else {
                    self.propose_leadership(Some(value.round)).await
                }
            }
            None => self.propose_leadership(None).await,
        }
    }

    async fn greatest_learned_value(&self) -> Option<PaxosValue> {
        match self.config.knowledge().greatest_learned_value().await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to read local knowledge");
                None
            }
        }
    }

    /// Teaches the local learner the greatest value any reachable learner has.
    async fn catch_up_knowledge(&self) {
        let wait = self.config.leader_ping_response_wait();
        let responses = join_all(
            self.config
                .learners()
                .iter()
                .map(|l| tokio::time::timeout(wait, l.greatest_learned_value())),
        )
        .await;

        let latest = responses
            .into_iter()
            .filter_map(|r| r.ok().and_then(|r| r.ok()).flatten())
            .max_by_key(|v| v.round);
        let Some(latest) = latest else {
            return;
        };

        let known = self.greatest_learned_value().await.map(|v| v.round);
        if known.is_none_or(|round| round < latest.round) {
            debug!(round = latest.round, leader = %latest.leader_id, "Catching up learned value");
            if let Err(e) = self.config.knowledge().learn(latest).await {
                warn!(error = %e, "Failed to update local knowledge");
            }
        }
    }

    async fn check_own_leadership(&self, value: &PaxosValue) -> LeadershipState {
        let token = LeadershipToken {
            leader_id: self.leader_id.clone(),
            round: value.round,
        };
        let leading = self.is_currently_leading();

        match self.confirm_quorum(value.round).await {
            QuorumCheck::Confirmed => {
                *self.quorum_lost_since.lock() = None;
                self.transition(LeadershipSnapshot {
                    state: LeadershipState::Leading,
                    token: Some(token),
                    suspected_leader: Some(self.leader_id.clone()),
                });
                LeadershipState::Leading
            }
            QuorumCheck::Superseded { latest } => {
                info!(round = value.round, latest, "A newer round was prepared, stepping back");
                *self.quorum_lost_since.lock() = None;
                self.transition(LeadershipSnapshot::not_leading(None));
                LeadershipState::NotLeading
            }
            QuorumCheck::NoQuorum {
                reachable,
                required,
            } => {
                self.config
                    .event_recorder()
                    .record_no_quorum(reachable, required);
                if !leading {
                    self.transition(LeadershipSnapshot::not_leading(None));
                    return LeadershipState::NotLeading;
                }

                let lost_for = {
                    let mut since = self.quorum_lost_since.lock();
                    since.get_or_insert_with(Instant::now).elapsed()
                };
                let only_log = self.config.only_log_on_quorum_failure();
                if !only_log || lost_for >= self.config.no_quorum_max_delay() {
                    warn!(
                        reachable,
                        required,
                        lost_for_ms = lost_for.as_millis() as u64,
                        "Leader lost acceptor quorum, giving up leadership"
                    );
                    *self.quorum_lost_since.lock() = None;
                    self.transition(LeadershipSnapshot::not_leading(None));
                    LeadershipState::NotLeading
                } else {
                    warn!(
                        reachable,
                        required,
                        lost_for_ms = lost_for.as_millis() as u64,
                        "Leader cannot reach acceptor quorum"
                    );
                    LeadershipState::Leading
                }
            }
        }
    }

    async fn confirm_quorum(&self, round: u64) -> QuorumCheck {
        let required = self.quorum_size();
        let wait = self.config.leader_ping_response_wait();
        let responses = join_all(self.config.acceptors().iter().map(|a| {
            tokio::time::timeout(wait, a.latest_sequence_prepared_or_accepted())
        }))
        .await;

        let sequences: Vec<u64> = responses
            .into_iter()
            .filter_map(|r| r.ok().and_then(|r| r.ok()))
            .collect();
        if let Some(latest) = sequences.iter().copied().max()
            && latest > round
        {
            return QuorumCheck::Superseded { latest };
        }
        if sequences.len() < required {
            return QuorumCheck::NoQuorum {
                reachable: sequences.len(),
                required,
            };
        }
        QuorumCheck::Confirmed
    }

    /// Pings the peer named `leader_id` on the `leader-ping` executor.
    async fn ping_leader(&self, leader_id: &str) -> bool {
        let Some(peer) = self
            .config
            .potential_leaders()
            .iter()
            .find(|p| p.leader_id() == leader_id)
            .cloned()
        else {
            warn!(leader_id, "Learned leader is not a known peer");
            return false;
        };

        let wait = self.config.leader_ping_response_wait();
        let ping = self
            .config
            .executor("leader-ping")
            .spawn(async move { tokio::time::timeout(wait, peer.leader.ping()).await });

        let alive = matches!(ping.await, Ok(Ok(Ok(true))));
        if !alive {
            self.config
                .event_recorder()
                .record_leader_ping_failure(leader_id);
        }
        alive
    }

    fn follow(&self, value: &PaxosValue) {
        self.transition(LeadershipSnapshot::not_leading(Some(value.leader_id.clone())));
    }

    async fn propose_leadership(&self, last_round: Option<u64>) -> LeadershipState {
        let previous_suspect = self.suspected_leader();
        self.transition(LeadershipSnapshot {
            state: LeadershipState::Electing,
            token: None,
            suspected_leader: previous_suspect,
        });

        let max_wait = self.config.random_wait_before_proposing_leadership_ms();
        if max_wait > 0 {
            let wait = rand::rng().random_range(0..=max_wait);
            tokio::time::sleep(Duration::from_millis(wait)).await;
        }

        // Someone may have won while we were backing off.
        let current = self.greatest_learned_value().await;
        if current.as_ref().map(|v| v.round) != last_round {
            debug!("Learned value changed during backoff, not proposing");
            self.transition(LeadershipSnapshot::not_leading(
                current.map(|v| v.leader_id),
            ));
            return LeadershipState::NotLeading;
        }

        let round = last_round.map_or(1, |r| r + 1);
        let recorder = self.config.event_recorder();
        recorder.record_proposal_attempt(round);

        match self.config.proposer().propose(round, None).await {
            Ok(value) if value.leader_id == self.leader_id => {
                *self.quorum_lost_since.lock() = None;
                self.transition(LeadershipSnapshot {
                    state: LeadershipState::Leading,
                    token: Some(LeadershipToken {
                        leader_id: self.leader_id.clone(),
                        round: value.round,
                    }),
                    suspected_leader: Some(self.leader_id.clone()),
                });
                LeadershipState::Leading
            }
            Ok(value) => {
                self.follow(&value);
                LeadershipState::NotLeading
            }
            Err(e) => {
                recorder.record_proposal_failure(&e);
                if let TenureError::QuorumUnavailable {
                    reachable,
                    required,
                } = e
                {
                    recorder.record_no_quorum(reachable, required);
                }
                self.transition(LeadershipSnapshot::not_leading(None));

                let max_delay = self.config.no_quorum_max_delay_ms();
                if max_delay > 0 {
                    let delay = rand::rng().random_range(0..=max_delay);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                LeadershipState::NotLeading
            }
        }
    }

    /// Publishes `next`, recording leadership gained/lost on token changes.
    fn transition(&self, next: LeadershipSnapshot) {
        let previous = self.status.send_replace(next.clone());
        if previous.token == next.token {
            return;
        }
        let recorder = self.config.event_recorder();
        if let Some(old) = &previous.token {
            recorder.record_leadership_lost(old);
        }
        if let Some(new) = &next.token {
            recorder.record_leadership_gained(new);
        }
        info!(
            from = %previous.state,
            to = %next.state,
            suspected_leader = ?next.suspected_leader,
            "Leadership changed"
        );
    }
}

impl LeadershipView for LeaderElectionService {
    fn current_token(&self) -> Option<LeadershipToken> {
        let status = self.status.borrow();
        match status.state {
            LeadershipState::Leading => status.token.clone(),
            _ => None,
        }
    }

    fn suspected_leader(&self) -> Option<String> {
        LeaderElectionService::suspected_leader(self)
    }
}

#[async_trait]
impl PingableLeader for LeaderElectionService {
    fn leader_id(&self) -> &str {
        &self.leader_id
    }

    async fn ping(&self) -> Result<bool> {
        Ok(self.is_currently_leading())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leader::memory::{LocalAcceptor, LocalLearner, QuorumProposer, StaticPingableLeader};
    use crate::leader::paxos::{PaxosAcceptor, PaxosLearner, PotentialLeader};

    struct Node {
        acceptors: Vec<Arc<LocalAcceptor>>,
        knowledge: Arc<LocalLearner>,
        service: LeaderElectionService,
    }

    fn node(
        acceptor_count: usize,
        peers: Vec<PotentialLeader>,
        customize: impl FnOnce(LeaderElectionServiceBuilder) -> LeaderElectionServiceBuilder,
    ) -> Node {
        let acceptors: Vec<Arc<LocalAcceptor>> = (0..acceptor_count)
            .map(|i| Arc::new(LocalAcceptor::new(format!("acceptor-{}", i))))
            .collect();
        let dyn_acceptors: Vec<Arc<dyn PaxosAcceptor>> = acceptors
            .iter()
            .map(|a| a.clone() as Arc<dyn PaxosAcceptor>)
            .collect();
        let knowledge = Arc::new(LocalLearner::new());
        let learners = vec![knowledge.clone() as Arc<dyn PaxosLearner>];
        let proposer = Arc::new(QuorumProposer::new(
            "node-1",
            dyn_acceptors.clone(),
            learners.clone(),
        ));

        let builder = LeaderElectionService::builder()
            .proposer(proposer)
            .knowledge(knowledge.clone())
            .acceptors(dyn_acceptors)
            .learners(learners)
            .potential_leaders_to_hosts(peers)
            .ping_rate_ms(100)
            .leader_ping_response_wait_ms(50)
            .random_wait_before_proposing_leadership_ms(0)
            .no_quorum_max_delay_ms(0);
        let service = customize(builder).build().unwrap();

        Node {
            acceptors,
            knowledge,
            service,
        }
    }

    #[tokio::test]
    async fn test_single_node_becomes_leader() {
        let node = node(1, vec![], |b| b);
        assert_eq!(node.service.state(), LeadershipState::NotLeading);

        assert_eq!(node.service.tick().await, LeadershipState::Leading);
        assert!(node.service.is_currently_leading());
        let token = node.service.leadership_token().unwrap();
        assert_eq!(token.leader_id, "node-1");
        assert_eq!(token.round, 1);

        // Stays leader on later ticks without a new round
        assert_eq!(node.service.tick().await, LeadershipState::Leading);
        assert_eq!(node.service.leadership_token(), Some(token.clone()));
        assert_eq!(
            node.service.is_still_leading(&token).await,
            StillLeadingStatus::Leading
        );
    }

    #[tokio::test]
    async fn test_no_quorum_keeps_node_not_leading() {
        let node = node(5, vec![], |b| b);
        for acceptor in &node.acceptors[..3] {
            acceptor.set_reachable(false);
        }

        assert_eq!(node.service.tick().await, LeadershipState::NotLeading);
        assert!(!node.service.is_currently_leading());
        assert_eq!(node.service.current_token(), None);
        assert_eq!(node.knowledge.greatest_learned_value().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_leader_steps_down_on_quorum_loss_when_not_only_logging() {
        let node = node(3, vec![], |b| b.only_log_on_quorum_failure(|| false));
        assert_eq!(node.service.tick().await, LeadershipState::Leading);
        let token = node.service.leadership_token().unwrap();

        node.acceptors[0].set_reachable(false);
        node.acceptors[1].set_reachable(false);
        assert_eq!(
            node.service.is_still_leading(&token).await,
            StillLeadingStatus::NoQuorum
        );
        assert_eq!(node.service.tick().await, LeadershipState::NotLeading);
        assert_eq!(node.service.leadership_token(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leader_tolerates_quorum_loss_up_to_max_delay() {
        let node = node(3, vec![], |b| b.no_quorum_max_delay_ms(1000));
        assert_eq!(node.service.tick().await, LeadershipState::Leading);

        node.acceptors[0].set_reachable(false);
        node.acceptors[1].set_reachable(false);
        assert_eq!(node.service.tick().await, LeadershipState::Leading);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(node.service.tick().await, LeadershipState::Leading);

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(node.service.tick().await, LeadershipState::NotLeading);
    }

    #[tokio::test]
    async fn test_follows_live_peer_leader() {
        let peer = Arc::new(StaticPingableLeader::new("node-2", true));
        let node = node(
            3,
            vec![PotentialLeader::new(peer.clone(), "10.0.0.2:8080")],
            |b| b,
        );
        node.knowledge
            .learn(PaxosValue {
                leader_id: "node-2".to_string(),
                round: 4,
                data: None,
            })
            .await
            .unwrap();

        assert_eq!(node.service.tick().await, LeadershipState::NotLeading);
        assert_eq!(node.service.suspected_leader(), Some("node-2".to_string()));
        assert_eq!(
            node.service.potential_leaders(),
            vec![("node-2".to_string(), "10.0.0.2:8080".to_string())]
        );

        // Peer dies: this node proposes itself for the next round
        peer.set_alive(false);
        assert_eq!(node.service.tick().await, LeadershipState::Leading);
        assert_eq!(node.service.leadership_token().unwrap().round, 5);
    }

    #[tokio::test]
    async fn test_superseded_round_ends_leadership() {
        let node = node(3, vec![], |b| b);
        assert_eq!(node.service.tick().await, LeadershipState::Leading);

        // Another proposer prepares round 2 on every acceptor
        let ballot = crate::leader::paxos::Ballot {
            number: 9,
            proposer_id: "node-2".to_string(),
        };
        for acceptor in &node.acceptors {
            acceptor.prepare(2, &ballot).await.unwrap();
        }
        assert_eq!(node.service.tick().await, LeadershipState::NotLeading);
    }

    #[tokio::test]
    async fn test_subscribers_observe_transitions() {
        let node = node(1, vec![], |b| b);
        let mut rx = node.service.subscribe();

        node.service.tick().await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().state, LeadershipState::Leading);
    }

    #[tokio::test]
    async fn test_ping_reports_leading() {
        let node = node(1, vec![], |b| b);
        assert!(!node.service.ping().await.unwrap());
        node.service.tick().await;
        assert!(node.service.ping().await.unwrap());
        assert_eq!(PingableLeader::leader_id(&node.service), "node-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_shutdown() {
        let node = node(1, vec![], |b| b);
        let service = Arc::new(node.service);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = service.start(shutdown_rx);
        let mut rx = service.subscribe();
        rx.wait_for(|s| s.state == LeadershipState::Leading)
            .await
            .unwrap();

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
        assert!(!service.is_currently_leading());
    }
}
