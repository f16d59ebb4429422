//! Leader election
//!
//! This module provides:
//! - Paxos collaborator traits (acceptor, learner, proposer, pingable peer)
//! - In-memory collaborators for standalone nodes and tests
//! - `LeaderElectionServiceBuilder` and the validated `LeaderElectionConfig`
//! - `LeaderElectionService`, the election loop publishing `LeadershipState`
//! - Event recorders the loop reports to

mod config;
mod event;
pub mod memory;
pub mod paxos;
mod service;

pub use config::*;
pub use event::*;
pub use service::*;
