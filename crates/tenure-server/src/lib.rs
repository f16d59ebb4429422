//! Tenure Server - standalone lock and leader election node
//!
//! This crate provides:
//! - Layered configuration (YAML file, environment, command line)
//! - Logging and metrics setup
//! - Assembly of the election service, lock service and router into a node
//! - Graceful shutdown handling

pub mod config;
pub mod metrics;
pub mod startup;
