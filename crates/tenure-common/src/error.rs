//! Error types for Tenure
//!
//! Duplicate `unlock`/`timeout` calls are absorbed by the lock layer and never
//! show up here.

/// Application-specific error types
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TenureError {
    /// Invalid construction-time state, e.g. a negative timing parameter.
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// Fewer than `required` acceptors answered.
    #[error("no quorum: {reachable} acceptors reachable, {required} required")]
    QuorumUnavailable { reachable: usize, required: usize },

    #[error("this node is not the current leader (suspected leader: {})", .suspected_leader.as_deref().unwrap_or("unknown"))]
    NotCurrentLeader { suspected_leader: Option<String> },

    /// Lock state built under a deposed leader was abandoned.
    #[error("leadership lost while the request was in flight")]
    LeadershipLost,

    #[error("network error: {0}")]
    Network(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TenureError {
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::IllegalArgument(message.into())
    }

    /// Whether the caller should retry, possibly against another node.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QuorumUnavailable { .. }
                | Self::NotCurrentLeader { .. }
                | Self::LeadershipLost
                | Self::Network(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TenureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TenureError::LeadershipLost.is_retryable());
        assert!(
            TenureError::QuorumUnavailable {
                reachable: 2,
                required: 3
            }
            .is_retryable()
        );
        assert!(
            TenureError::NotCurrentLeader {
                suspected_leader: None
            }
            .is_retryable()
        );
        assert!(!TenureError::illegal_state("bad").is_retryable());
        assert!(!TenureError::illegal_argument("bad").is_retryable());
    }

    #[test]
    fn test_display_messages() {
        let err = TenureError::QuorumUnavailable {
            reachable: 2,
            required: 3,
        };
        assert_eq!(
            err.to_string(),
            "no quorum: 2 acceptors reachable, 3 required"
        );

        let err = TenureError::NotCurrentLeader {
            suspected_leader: Some("node-2".to_string()),
        };
        assert!(err.to_string().contains("node-2"));

        let err = TenureError::NotCurrentLeader {
            suspected_leader: None,
        };
        assert!(err.to_string().contains("unknown"));
    }
}
