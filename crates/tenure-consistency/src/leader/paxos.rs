//! Paxos collaborator contracts
//!
//! The election service consumes these; it never looks inside a round. A
//! networked deployment provides RPC-backed implementations, standalone nodes
//! and tests use the in-process ones from `leader::memory`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tenure_common::Result;

/// Value agreed for one sequence: which node leads that round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaxosValue {
    pub leader_id: String,
    /// Sequence number the value was chosen for; doubles as the term number.
    pub round: u64,
    #[serde(default)]
    pub data: Option<Vec<u8>>,
}

/// Totally ordered proposal number. Ties on `number` break on proposer id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ballot {
    pub number: u64,
    pub proposer_id: String,
}

impl fmt::Display for Ballot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.number, self.proposer_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaxosProposal {
    pub ballot: Ballot,
    pub value: PaxosValue,
}

/// Acceptor answer to a prepare.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaxosPromise {
    pub promised: bool,
    /// Highest ballot this acceptor has promised for the sequence
    pub promised_ballot: Ballot,
    pub last_accepted: Option<PaxosProposal>,
}

#[async_trait]
pub trait PaxosAcceptor: Send + Sync {
    async fn prepare(&self, seq: u64, ballot: &Ballot) -> Result<PaxosPromise>;

    /// `true` acknowledges the proposal.
    async fn accept(&self, seq: u64, proposal: &PaxosProposal) -> Result<bool>;

    async fn latest_sequence_prepared_or_accepted(&self) -> Result<u64>;
}

#[async_trait]
pub trait PaxosLearner: Send + Sync {
    async fn learn(&self, value: PaxosValue) -> Result<()>;

    async fn learned_value(&self, seq: u64) -> Result<Option<PaxosValue>>;

    async fn greatest_learned_value(&self) -> Result<Option<PaxosValue>>;
}

#[async_trait]
pub trait PaxosProposer: Send + Sync {
    /// Identity of the node this proposer proposes for.
    fn proposer_id(&self) -> &str;

    /// Runs a round for `seq` proposing this node as leader. Returns the value
    /// chosen for `seq`, which is an earlier accepted value if one exists.
    /// Fails with `QuorumUnavailable` when a quorum does not acknowledge.
    async fn propose(&self, seq: u64, data: Option<Vec<u8>>) -> Result<PaxosValue>;
}

/// A peer that can be asked whether it currently leads.
#[async_trait]
pub trait PingableLeader: Send + Sync {
    fn leader_id(&self) -> &str;

    /// `Ok(true)` when the peer is alive and leading.
    async fn ping(&self) -> Result<bool>;
}

/// A remote peer and the address it is reached at.
#[derive(Clone)]
pub struct PotentialLeader {
    pub leader: Arc<dyn PingableLeader>,
    pub address: String,
}

impl PotentialLeader {
    pub fn new(leader: Arc<dyn PingableLeader>, address: impl Into<String>) -> Self {
        Self {
            leader,
            address: address.into(),
        }
    }

    pub fn leader_id(&self) -> &str {
        self.leader.leader_id()
    }
}

impl fmt::Debug for PotentialLeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PotentialLeader")
            .field("leader_id", &self.leader_id())
            .field("address", &self.address)
            .finish()
    }
}

pub fn quorum_size(acceptors: usize) -> usize {
    acceptors / 2 + 1
}
