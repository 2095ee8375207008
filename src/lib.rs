//! Search Operator Library
//!
//! Core functionality of the Search Operator: the SearchService CRD, the
//! reconciler and the runtime that drives it.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod runtime;

// Re-export CRD types for convenience
pub use crd::*;
