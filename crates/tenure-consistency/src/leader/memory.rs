// In-process Paxos collaborators
// Used by standalone nodes and tests; networked deployments plug RPC-backed
// implementations into the same traits.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tenure_common::{Result, TenureError};
use tracing::{debug, warn};

use super::paxos::{
    Ballot, PaxosAcceptor, PaxosLearner, PaxosPromise, PaxosProposal, PaxosProposer, PaxosValue,
    PingableLeader, quorum_size,
};

const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Default)]
struct AcceptorSlot {
    promised: Option<Ballot>,
    accepted: Option<PaxosProposal>,
}

/// Acceptor holding its state in memory. Can be marked unreachable to
/// simulate a partition.
pub struct LocalAcceptor {
    name: String,
    slots: Mutex<BTreeMap<u64, AcceptorSlot>>,
    reachable: AtomicBool,
}

impl LocalAcceptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slots: Mutex::new(BTreeMap::new()),
            reachable: AtomicBool::new(true),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(TenureError::Network(format!(
                "acceptor {} unreachable",
                self.name
            )))
        }
    }
}

#[async_trait]
impl PaxosAcceptor for LocalAcceptor {
    async fn prepare(&self, seq: u64, ballot: &Ballot) -> Result<PaxosPromise> {
        self.check_reachable()?;
        let mut slots = self.slots.lock();
        let slot = slots.entry(seq).or_default();

        let promised = slot.promised.as_ref().is_none_or(|p| ballot >= p);
        if promised {
            slot.promised = Some(ballot.clone());
        }
        Ok(PaxosPromise {
            promised,
            promised_ballot: slot.promised.clone().unwrap_or_else(|| ballot.clone()),
            last_accepted: slot.accepted.clone(),
        })
    }

    async fn accept(&self, seq: u64, proposal: &PaxosProposal) -> Result<bool> {
        self.check_reachable()?;
        let mut slots = self.slots.lock();
        let slot = slots.entry(seq).or_default();

        if slot
            .promised
            .as_ref()
            .is_none_or(|p| &proposal.ballot >= p)
        {
            slot.promised = Some(proposal.ballot.clone());
            slot.accepted = Some(proposal.clone());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn latest_sequence_prepared_or_accepted(&self) -> Result<u64> {
        self.check_reachable()?;
        Ok(self
            .slots
            .lock()
            .last_key_value()
            .map(|(seq, _)| *seq)
            .unwrap_or(0))
    }
}

/// Learner keeping every learned value in memory.
#[derive(Default)]
pub struct LocalLearner {
    learned: Mutex<BTreeMap<u64, PaxosValue>>,
}

impl LocalLearner {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaxosLearner for LocalLearner {
    async fn learn(&self, value: PaxosValue) -> Result<()> {
        // A chosen value never changes; the first one learned stands.
        self.learned.lock().entry(value.round).or_insert(value);
        Ok(())
    }

    async fn learned_value(&self, seq: u64) -> Result<Option<PaxosValue>> {
        Ok(self.learned.lock().get(&seq).cloned())
    }

    async fn greatest_learned_value(&self) -> Result<Option<PaxosValue>> {
        Ok(self
            .learned
            .lock()
            .last_key_value()
            .map(|(_, value)| value.clone()))
    }
}

/// Two-phase proposer over a fixed acceptor set. Learners are taught the
/// chosen value once a quorum accepts it.
pub struct QuorumProposer {
    proposer_id: String,
    acceptors: Vec<Arc<dyn PaxosAcceptor>>,
    learners: Vec<Arc<dyn PaxosLearner>>,
    ballot_number: AtomicU64,
    response_timeout: Duration,
}

impl QuorumProposer {
    pub fn new(
        proposer_id: impl Into<String>,
        acceptors: Vec<Arc<dyn PaxosAcceptor>>,
        learners: Vec<Arc<dyn PaxosLearner>>,
    ) -> Self {
        Self {
            proposer_id: proposer_id.into(),
            acceptors,
            learners,
            ballot_number: AtomicU64::new(0),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    pub fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    pub fn quorum_size(&self) -> usize {
        quorum_size(self.acceptors.len())
    }

    fn next_ballot(&self) -> Ballot {
        Ballot {
            number: self.ballot_number.fetch_add(1, Ordering::SeqCst) + 1,
            proposer_id: self.proposer_id.clone(),
        }
    }

    /// Makes sure the next ballot outranks one seen in a rejection.
    fn observe(&self, ballot: &Ballot) {
        self.ballot_number.fetch_max(ballot.number, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaxosProposer for QuorumProposer {
    fn proposer_id(&self) -> &str {
        &self.proposer_id
    }

    async fn propose(&self, seq: u64, data: Option<Vec<u8>>) -> Result<PaxosValue> {
        let required = self.quorum_size();
        let ballot = self.next_ballot();

        // Phase 1: prepare / promise
        let responses = join_all(
            self.acceptors
                .iter()
                .map(|a| tokio::time::timeout(self.response_timeout, a.prepare(seq, &ballot))),
        )
        .await;

        let mut promises = Vec::new();
        for response in responses {
            match response {
                Ok(Ok(promise)) if promise.promised => promises.push(promise),
                Ok(Ok(promise)) => self.observe(&promise.promised_ballot),
                Ok(Err(e)) => debug!(seq, %ballot, error = %e, "Prepare failed"),
                Err(_) => debug!(seq, %ballot, "Prepare timed out"),
            }
        }
        if promises.len() < required {
            return Err(TenureError::QuorumUnavailable {
                reachable: promises.len(),
                required,
            });
        }

        let value = promises
            .iter()
            .filter_map(|p| p.last_accepted.as_ref())
            .max_by(|a, b| a.ballot.cmp(&b.ballot))
            .map(|p| p.value.clone())
            .unwrap_or_else(|| PaxosValue {
                leader_id: self.proposer_id.clone(),
                round: seq,
                data,
            });
        let proposal = PaxosProposal { ballot, value };

        // Phase 2: accept
        let responses = join_all(
            self.acceptors
                .iter()
                .map(|a| tokio::time::timeout(self.response_timeout, a.accept(seq, &proposal))),
        )
        .await;
        let acks = responses
            .iter()
            .filter(|r| matches!(r, Ok(Ok(true))))
            .count();
        if acks < required {
            return Err(TenureError::QuorumUnavailable {
                reachable: acks,
                required,
            });
        }

        for result in join_all(self.learners.iter().map(|l| l.learn(proposal.value.clone()))).await
        {
            if let Err(e) = result {
                warn!(seq, error = %e, "Failed to teach learner");
            }
        }

        debug!(
            seq,
            ballot = %proposal.ballot,
            leader = %proposal.value.leader_id,
            "Value chosen"
        );
        Ok(proposal.value)
    }
}

/// Pingable peer whose liveness is set by the caller.
pub struct StaticPingableLeader {
    leader_id: String,
    alive: AtomicBool,
}

impl StaticPingableLeader {
    pub fn new(leader_id: impl Into<String>, alive: bool) -> Self {
        Self {
            leader_id: leader_id.into(),
            alive: AtomicBool::new(alive),
        }
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }
}

#[async_trait]
impl PingableLeader for StaticPingableLeader {
    fn leader_id(&self) -> &str {
        &self.leader_id
    }

    async fn ping(&self) -> Result<bool> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(true)
        } else {
            Err(TenureError::Network(format!(
                "leader {} unreachable",
                self.leader_id
            )))
        }
    }
}
