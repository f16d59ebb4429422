//! Distributed lock state
//!
//! This module provides:
//! - `AsyncLock`: one descriptor's exclusive-hold state machine
//! - `AsyncResult`: the single-assignment outcome of a lock or wait call
//! - `LockTable`: the lazily populated, term-scoped set of locks
//! - `LockAcquirer`: multi-descriptor acquisition in canonical order
//! - `LeaderLockService`: the `RemoteLockService` served by the current leader

mod acquirer;
mod async_lock;
mod result;
mod service;
mod table;

pub use acquirer::*;
pub use async_lock::*;
pub use result::*;
pub use service::*;
pub use table::*;
