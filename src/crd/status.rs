//! # SearchService Status
//!
//! Status types observed on the owner resource.

use serde::{Deserialize, Serialize};

/// Status of the SearchService resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchServiceStatus {
    /// Values: Pending, Progressing, Ready
    #[serde(default)]
    pub phase: Option<String>,
    /// Ready replicas reported by the deployment
    #[serde(default)]
    pub available_nodes: i32,
    /// Version currently requested of the workload
    #[serde(default)]
    pub version: Option<String>,
    /// Values: None, Pending, Established
    #[serde(default)]
    pub association: Option<String>,
    /// Name of the HTTP service
    #[serde(default)]
    pub service: Option<String>,
}

/// Phase values
pub const PHASE_PENDING: &str = "Pending";
pub const PHASE_PROGRESSING: &str = "Progressing";
pub const PHASE_READY: &str = "Ready";

/// Association values
pub const ASSOCIATION_NONE: &str = "None";
pub const ASSOCIATION_PENDING: &str = "Pending";
pub const ASSOCIATION_ESTABLISHED: &str = "Established";
