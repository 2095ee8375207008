//! # Metrics Module
//!
//! Prometheus metrics for monitoring the operator, organized by responsibility.
//!
//! ## Sub-modules
//!
//! - `registry` - Metrics registry setup, registration and exposition
//! - `controller_metrics` - Reconciliations, dependent writes, certificates, requeues, watches

pub mod controller_metrics;
pub mod registry;

pub use controller_metrics::*;
pub use registry::*;
