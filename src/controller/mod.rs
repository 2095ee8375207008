//! # Controller
//!
//! Reconciliation of SearchService resources and the machinery around it:
//! platform storage, certificates, association resolution, event recording,
//! watch bookkeeping and the metrics/probe server.

pub mod association;
pub mod backoff;
pub mod certificates;
pub mod events;
pub mod managed_set;
pub mod reconciler;
pub mod server;
pub mod store;
pub mod watches;
