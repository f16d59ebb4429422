//! Tenure Common - shared lock model and service contract
//!
//! This crate provides:
//! - Lock descriptors, request ids and lock request/response types
//! - The `RemoteLockService` contract implemented by servers and routers
//! - The `TenureError` taxonomy used across the workspace

pub mod error;
pub mod model;
pub mod service;

pub use error::{Result, TenureError};
pub use model::*;
pub use service::{RemoteLockService, dispatch_lock};
