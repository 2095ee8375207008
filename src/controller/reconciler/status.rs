//! # Status Management
//!
//! Computes the SearchService status from the converged deployment and writes
//! it only when it changed, so self-induced updates do not trigger new passes.

use crate::controller::association::Association;
use crate::controller::store::{Store, StoreError};
use crate::crd::{
    SearchService, SearchServiceStatus, ASSOCIATION_ESTABLISHED, ASSOCIATION_NONE,
    ASSOCIATION_PENDING, PHASE_PENDING, PHASE_PROGRESSING, PHASE_READY,
};
use k8s_openapi::api::apps::v1::Deployment;
use tracing::debug;

/// Desired status given the converged deployment
pub fn compute_status(
    owner: &SearchService,
    deployment: &Deployment,
    association: &Association,
    service_name: &str,
) -> SearchServiceStatus {
    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    let available = deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);

    let phase = if deployment.status.is_none() {
        PHASE_PENDING
    } else if available >= desired {
        PHASE_READY
    } else {
        PHASE_PROGRESSING
    };

    let association = match association {
        Association::NotConfigured => ASSOCIATION_NONE,
        Association::Resolved(_) => ASSOCIATION_ESTABLISHED,
        Association::Unresolved => ASSOCIATION_PENDING,
    };

    SearchServiceStatus {
        phase: Some(phase.to_string()),
        available_nodes: available,
        version: Some(owner.spec.version.clone()),
        association: Some(association.to_string()),
        service: Some(service_name.to_string()),
    }
}

/// Persist `status` unless the owner already reports it
pub async fn update_status<S: Store>(
    store: &S,
    owner: SearchService,
    status: SearchServiceStatus,
) -> Result<(SearchService, bool), StoreError> {
    if owner.status.as_ref() == Some(&status) {
        debug!("Skipping status update - status unchanged");
        return Ok((owner, false));
    }
    let mut updated = owner;
    updated.status = Some(status);
    let updated = store.update_status(&updated).await?;
    Ok((updated, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::SearchServiceSpec;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};

    fn owner() -> SearchService {
        SearchService::new(
            "sample",
            SearchServiceSpec {
                version: "7.7.0".to_string(),
                ..SearchServiceSpec::default()
            },
        )
    }

    fn deployment(replicas: i32, available: Option<i32>) -> Deployment {
        Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                ..DeploymentSpec::default()
            }),
            status: available.map(|a| DeploymentStatus {
                available_replicas: Some(a),
                ..DeploymentStatus::default()
            }),
            ..Deployment::default()
        }
    }

    #[test]
    fn test_phase_follows_available_replicas() {
        let pending = compute_status(&owner(), &deployment(3, None), &Association::NotConfigured, "svc");
        assert_eq!(pending.phase.as_deref(), Some(PHASE_PENDING));

        let progressing = compute_status(&owner(), &deployment(3, Some(1)), &Association::NotConfigured, "svc");
        assert_eq!(progressing.phase.as_deref(), Some(PHASE_PROGRESSING));
        assert_eq!(progressing.available_nodes, 1);

        let ready = compute_status(&owner(), &deployment(3, Some(3)), &Association::NotConfigured, "svc");
        assert_eq!(ready.phase.as_deref(), Some(PHASE_READY));
        assert_eq!(ready.association.as_deref(), Some(ASSOCIATION_NONE));
        assert_eq!(ready.version.as_deref(), Some("7.7.0"));
    }
}
