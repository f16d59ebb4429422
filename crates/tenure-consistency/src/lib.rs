//! Tenure Consistency - lock state and leader election
//!
//! This crate provides:
//! - Per-resource asynchronous lock state machines
//! - The leader-aware lock service that owns one lock table per leadership term
//! - Paxos-based leader election and its builder/configuration contract
//! - In-memory Paxos collaborators for standalone nodes and tests

pub mod leader;
pub mod lock;

// Re-export lock types
pub use lock::{
    AsyncLock, AsyncResult, LeaderLockService, LeadershipView, LockAcquirer, LockOutcome,
    LockServiceConfig, LockTable,
};

// Re-export leader election types
pub use leader::{
    DEFAULT_NO_QUORUM_MAX_DELAY_MS, LeaderElectionConfig, LeaderElectionEventRecorder,
    LeaderElectionService, LeaderElectionServiceBuilder, LeadershipState, NoOpEventRecorder,
    StillLeadingStatus, TracingEventRecorder,
};
