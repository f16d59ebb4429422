//! Tenure Client - lock request routing
//!
//! This crate provides:
//! - `LockRequestRouter`, a `RemoteLockService` that keeps blocking lock
//!   traffic off the connection used by fast non-blocking calls
//! - `route`, the pure routing decision for a single request

pub mod router;

pub use router::{LockRequestRouter, Route, route};
