// Leader election configuration
// Builder-accumulated parameters validated once into an immutable record

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tenure_common::{Result, TenureError};
use tokio::runtime::Handle;

use super::event::{LeaderElectionEventRecorder, NoOpEventRecorder};
use super::paxos::{PaxosAcceptor, PaxosLearner, PaxosProposer, PotentialLeader, quorum_size};
use super::service::LeaderElectionService;

pub const DEFAULT_NO_QUORUM_MAX_DELAY_MS: i64 = 5000;
pub const DEFAULT_PING_RATE_MS: u64 = 5000;
pub const DEFAULT_LEADER_PING_RESPONSE_WAIT_MS: u64 = 5000;

/// Maps a purpose name (used for instrumentation only) to the runtime tasks
/// for that purpose are spawned on.
pub type ExecutorFactory = Arc<dyn Fn(&str) -> Handle + Send + Sync>;

/// Decides at run time whether quorum failures are only logged.
pub type QuorumFailurePolicy = Arc<dyn Fn() -> bool + Send + Sync>;

/// Immutable configuration of a `LeaderElectionService`
#[derive(Clone)]
pub struct LeaderElectionConfig {
    proposer: Arc<dyn PaxosProposer>,
    knowledge: Arc<dyn PaxosLearner>,
    potential_leaders: Arc<[PotentialLeader]>,
    acceptors: Arc<[Arc<dyn PaxosAcceptor>]>,
    learners: Arc<[Arc<dyn PaxosLearner>]>,
    executor_factory: ExecutorFactory,
    /// Interval between health checks of the current leader
    ping_rate_ms: u64,
    /// Upper bound of the random backoff before proposing leadership
    random_wait_before_proposing_leadership_ms: u64,
    /// How long tolerating an unreachable acceptor quorum before surfacing it
    no_quorum_max_delay_ms: u64,
    /// How long a leader ping may take before the leader counts as unreachable
    leader_ping_response_wait_ms: u64,
    event_recorder: Arc<dyn LeaderElectionEventRecorder>,
    only_log_on_quorum_failure: QuorumFailurePolicy,
}

impl LeaderElectionConfig {
    pub fn builder() -> LeaderElectionServiceBuilder {
        LeaderElectionServiceBuilder::default()
    }

    pub fn proposer(&self) -> &Arc<dyn PaxosProposer> {
        &self.proposer
    }

    pub fn knowledge(&self) -> &Arc<dyn PaxosLearner> {
        &self.knowledge
    }

    /// Every peer except this node.
    pub fn potential_leaders(&self) -> &[PotentialLeader] {
        &self.potential_leaders
    }

    pub fn acceptors(&self) -> &[Arc<dyn PaxosAcceptor>] {
        &self.acceptors
    }

    pub fn learners(&self) -> &[Arc<dyn PaxosLearner>] {
        &self.learners
    }

    pub fn quorum_size(&self) -> usize {
        quorum_size(self.acceptors.len())
    }

    pub fn executor(&self, purpose: &str) -> Handle {
        (self.executor_factory)(purpose)
    }

    pub fn event_recorder(&self) -> &Arc<dyn LeaderElectionEventRecorder> {
        &self.event_recorder
    }

    pub fn only_log_on_quorum_failure(&self) -> bool {
        (self.only_log_on_quorum_failure)()
    }

    pub fn ping_rate_ms(&self) -> u64 {
        self.ping_rate_ms
    }

    pub fn random_wait_before_proposing_leadership_ms(&self) -> u64 {
        self.random_wait_before_proposing_leadership_ms
    }

    pub fn no_quorum_max_delay_ms(&self) -> u64 {
        self.no_quorum_max_delay_ms
    }

    pub fn leader_ping_response_wait_ms(&self) -> u64 {
        self.leader_ping_response_wait_ms
    }

    pub fn ping_rate(&self) -> Duration {
        Duration::from_millis(self.ping_rate_ms)
    }

    pub fn no_quorum_max_delay(&self) -> Duration {
        Duration::from_millis(self.no_quorum_max_delay_ms)
    }

    pub fn leader_ping_response_wait(&self) -> Duration {
        Duration::from_millis(self.leader_ping_response_wait_ms)
    }
}

impl fmt::Debug for LeaderElectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaderElectionConfig")
            .field("proposer_id", &self.proposer.proposer_id())
            .field("potential_leaders", &self.potential_leaders)
            .field("acceptors", &self.acceptors.len())
            .field("learners", &self.learners.len())
            .field("ping_rate_ms", &self.ping_rate_ms)
            .field(
                "random_wait_before_proposing_leadership_ms",
                &self.random_wait_before_proposing_leadership_ms,
            )
            .field("no_quorum_max_delay_ms", &self.no_quorum_max_delay_ms)
            .field(
                "leader_ping_response_wait_ms",
                &self.leader_ping_response_wait_ms,
            )
            .finish()
    }
}

pub struct LeaderElectionServiceBuilder {
    proposer: Option<Arc<dyn PaxosProposer>>,
    knowledge: Option<Arc<dyn PaxosLearner>>,
    potential_leaders: Vec<PotentialLeader>,
    acceptors: Vec<Arc<dyn PaxosAcceptor>>,
    learners: Vec<Arc<dyn PaxosLearner>>,
    executor_factory: Option<ExecutorFactory>,
    ping_rate_ms: u64,
    random_wait_before_proposing_leadership_ms: i64,
    no_quorum_max_delay_ms: i64,
    leader_ping_response_wait_ms: u64,
    event_recorder: Arc<dyn LeaderElectionEventRecorder>,
    only_log_on_quorum_failure: QuorumFailurePolicy,
}

impl Default for LeaderElectionServiceBuilder {
    fn default() -> Self {
        Self {
            proposer: None,
            knowledge: None,
            potential_leaders: Vec::new(),
            acceptors: Vec::new(),
            learners: Vec::new(),
            executor_factory: None,
            ping_rate_ms: DEFAULT_PING_RATE_MS,
            random_wait_before_proposing_leadership_ms: 0,
            no_quorum_max_delay_ms: DEFAULT_NO_QUORUM_MAX_DELAY_MS,
            leader_ping_response_wait_ms: DEFAULT_LEADER_PING_RESPONSE_WAIT_MS,
            event_recorder: Arc::new(NoOpEventRecorder),
            only_log_on_quorum_failure: Arc::new(|| true),
        }
    }
}

impl LeaderElectionServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn proposer(mut self, proposer: Arc<dyn PaxosProposer>) -> Self {
        self.proposer = Some(proposer);
        self
    }

    pub fn knowledge(mut self, knowledge: Arc<dyn PaxosLearner>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// Host information for every node in the cluster except this one.
    pub fn potential_leaders_to_hosts(
        mut self,
        potential_leaders: impl IntoIterator<Item = PotentialLeader>,
    ) -> Self {
        self.potential_leaders = potential_leaders.into_iter().collect();
        self
    }

    pub fn acceptors(mut self, acceptors: impl IntoIterator<Item = Arc<dyn PaxosAcceptor>>) -> Self {
        self.acceptors = acceptors.into_iter().collect();
        self
    }

    pub fn learners(mut self, learners: impl IntoIterator<Item = Arc<dyn PaxosLearner>>) -> Self {
        self.learners = learners.into_iter().collect();
        self
    }

    /// Runs every task on one runtime regardless of purpose.
    pub fn executor(mut self, executor: Handle) -> Self {
        let factory: ExecutorFactory = Arc::new(move |_: &str| executor.clone());
        self.executor_factory = Some(factory);
        self
    }

    pub fn executor_service_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Handle + Send + Sync + 'static,
    {
        let factory: ExecutorFactory = Arc::new(factory);
        self.executor_factory = Some(factory);
        self
    }

    pub fn ping_rate_ms(mut self, ping_rate_ms: u64) -> Self {
        self.ping_rate_ms = ping_rate_ms;
        self
    }

    pub fn random_wait_before_proposing_leadership_ms(mut self, wait_ms: i64) -> Self {
        self.random_wait_before_proposing_leadership_ms = wait_ms;
        self
    }

    pub fn leader_ping_response_wait_ms(mut self, wait_ms: u64) -> Self {
        self.leader_ping_response_wait_ms = wait_ms;
        self
    }

    pub fn no_quorum_max_delay_ms(mut self, delay_ms: i64) -> Self {
        self.no_quorum_max_delay_ms = delay_ms;
        self
    }

    pub fn event_recorder(mut self, event_recorder: Arc<dyn LeaderElectionEventRecorder>) -> Self {
        self.event_recorder = event_recorder;
        self
    }

    pub fn only_log_on_quorum_failure<F>(mut self, policy: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.only_log_on_quorum_failure = Arc::new(policy);
        self
    }

    /// Validates the accumulated parameters. Without an executor the ambient
    /// tokio runtime is used; outside a runtime this fails.
    pub fn build_config(self) -> Result<LeaderElectionConfig> {
        if self.ping_rate_ms == 0 {
            return Err(TenureError::illegal_state(
                "pingRateMs should be positive; was 0",
            ));
        }
        if self.random_wait_before_proposing_leadership_ms < 0 {
            return Err(TenureError::illegal_state(format!(
                "randomWaitBeforeProposingLeadershipMs should be positive; was {}",
                self.random_wait_before_proposing_leadership_ms
            )));
        }
        if self.no_quorum_max_delay_ms < 0 {
            return Err(TenureError::illegal_state(format!(
                "noQuorumMaxDelayMs should be positive; was {}",
                self.no_quorum_max_delay_ms
            )));
        }
        let proposer = self
            .proposer
            .ok_or_else(|| TenureError::illegal_state("proposer must be set"))?;
        let knowledge = self
            .knowledge
            .ok_or_else(|| TenureError::illegal_state("knowledge must be set"))?;
        let executor_factory: ExecutorFactory = match self.executor_factory {
            Some(factory) => factory,
            None => {
                let handle = Handle::try_current().map_err(|_| {
                    TenureError::illegal_state("no executor set and no tokio runtime running")
                })?;
                Arc::new(move |_: &str| handle.clone())
            }
        };

        Ok(LeaderElectionConfig {
            proposer,
            knowledge,
            potential_leaders: self.potential_leaders.into(),
            acceptors: self.acceptors.into(),
            learners: self.learners.into(),
            executor_factory,
            ping_rate_ms: self.ping_rate_ms,
            random_wait_before_proposing_leadership_ms: self
                .random_wait_before_proposing_leadership_ms
                as u64,
            no_quorum_max_delay_ms: self.no_quorum_max_delay_ms as u64,
            leader_ping_response_wait_ms: self.leader_ping_response_wait_ms,
            event_recorder: self.event_recorder,
            only_log_on_quorum_failure: self.only_log_on_quorum_failure,
        })
    }

    pub fn build(self) -> Result<LeaderElectionService> {
        Ok(LeaderElectionService::new(self.build_config()?))
    }
}
