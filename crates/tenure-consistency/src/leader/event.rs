// Leader election event recording
// Sink the election loop reports leadership changes and quorum failures to

use metrics::counter;
use tenure_common::{LeadershipToken, TenureError};
use tracing::{debug, info, warn};

/// Receives election events. Implementations must not block or panic; every
/// method defaults to doing nothing.
pub trait LeaderElectionEventRecorder: Send + Sync {
    fn record_proposal_attempt(&self, _round: u64) {}

    fn record_proposal_failure(&self, _error: &TenureError) {}

    fn record_leadership_gained(&self, _token: &LeadershipToken) {}

    fn record_leadership_lost(&self, _token: &LeadershipToken) {}

    fn record_leader_ping_failure(&self, _leader_id: &str) {}

    fn record_no_quorum(&self, _reachable: usize, _required: usize) {}
}

/// Discards every event
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpEventRecorder;

impl LeaderElectionEventRecorder for NoOpEventRecorder {}

/// Logs events and counts them through the `metrics` facade
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventRecorder;

impl LeaderElectionEventRecorder for TracingEventRecorder {
    fn record_proposal_attempt(&self, round: u64) {
        debug!(round, "[LeaderEvent] Proposing leadership");
        counter!("tenure_leadership_proposals_total").increment(1);
    }

    fn record_proposal_failure(&self, error: &TenureError) {
        warn!(error = %error, "[LeaderEvent] Leadership proposal failed");
    }

    fn record_leadership_gained(&self, token: &LeadershipToken) {
        info!(token = %token, "[LeaderEvent] Gained leadership");
        counter!("tenure_leadership_gained_total").increment(1);
    }

    fn record_leadership_lost(&self, token: &LeadershipToken) {
        info!(token = %token, "[LeaderEvent] Lost leadership");
        counter!("tenure_leadership_lost_total").increment(1);
    }

    fn record_leader_ping_failure(&self, leader_id: &str) {
        warn!(leader_id, "[LeaderEvent] Leader did not answer ping");
        counter!("tenure_leader_ping_failures_total").increment(1);
    }

    fn record_no_quorum(&self, reachable: usize, required: usize) {
        warn!(
            reachable,
            required, "[LeaderEvent] Unable to reach a quorum of acceptors"
        );
        counter!("tenure_quorum_failures_total").increment(1);
    }
}
