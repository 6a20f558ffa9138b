#![deny(unused)]
//! Governance for Code Play.
//!
//! This crate provides:
//! - Logging and distributed tracing
//! - Prometheus metrics
//! - Bearer credential validation (HS256 JWT)

pub mod auth;
pub mod metrics;
pub mod tracing_layer;

pub use auth::{Claims, JwtCredentialValidator};
pub use metrics::{setup_metrics_recorder, track_exec_exit, track_request};
pub use tracing_layer::{configure_tracing, shutdown_tracing};
