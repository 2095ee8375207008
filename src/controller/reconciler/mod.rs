//! # Reconciler
//!
//! Converges SearchService resources into their dependents.
//!
//! ## Sub-modules
//!
//! - `types` - Reconciler context, outcome and error types
//! - `validation` - Spec validation and defaulting
//! - `names` - Dependent naming
//! - `converge` - Per-dependent convergence steps
//! - `status` - Status computation and updates
//! - `reconcile` - The reconcile pass and its kube-runtime entry point

pub mod converge;
pub mod names;
pub mod reconcile;
pub mod status;
pub mod types;
pub mod validation;

pub use reconcile::{reconcile, requeue_after};
pub use types::*;
pub use validation::{DefaultSpecValidator, SpecValidator, ValidationError};
