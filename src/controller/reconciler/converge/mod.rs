//! # Resource Convergence
//!
//! Drives each dependent of a SearchService to its desired state.
//!
//! Every dependent kind follows the same shape: build the expected object,
//! read the current one, create it when absent, and when `needs_update`
//! reports drift, patch the current object in place with `update_reconciled`
//! so platform-assigned fields survive. The steps are called sequentially by
//! the reconciler because later ones consume earlier outputs (certificates,
//! configuration hash).

pub mod config;
pub mod deployment;
pub mod remote_links;
pub mod service;
pub mod tls;

use crate::controller::store::{Object, ObjectKey, Store, StoreError};
use crate::crd::SearchService;
use crate::observability;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Converged object and whether a write was needed
#[derive(Debug, Clone)]
pub struct Applied<K> {
    pub object: K,
    pub changed: bool,
}

/// Create `expected` or bring the existing object in line with it
pub async fn reconcile_resource<S, K, N, U>(
    store: &S,
    expected: K,
    needs_update: N,
    update_reconciled: U,
) -> Result<Applied<K>, StoreError>
where
    S: Store,
    K: Object,
    N: Fn(&K, &K) -> bool,
    U: Fn(&K, &mut K),
{
    let key = ObjectKey::of(&expected);
    let kind = K::kind(&()).to_string();

    let Some(mut reconciled) = store.get::<K>(&key).await? else {
        info!(kind = %kind, object = %key, "Creating dependent");
        let created = store.create(&expected).await?;
        observability::metrics::increment_dependent_writes(&kind);
        return Ok(Applied {
            object: created,
            changed: true,
        });
    };

    if !needs_update(&expected, &reconciled) {
        debug!(kind = %kind, object = %key, "Dependent up to date");
        return Ok(Applied {
            object: reconciled,
            changed: false,
        });
    }

    info!(kind = %kind, object = %key, "Updating dependent");
    update_reconciled(&expected, &mut reconciled);
    let updated = store.update(&reconciled).await?;
    observability::metrics::increment_dependent_writes(&kind);
    Ok(Applied {
        object: updated,
        changed: true,
    })
}

/// Metadata for a dependent living in the owner's namespace
pub fn dependent_meta(owner: &SearchService, name: String) -> ObjectMeta {
    let owner_name = owner.metadata.name.clone().unwrap_or_default();
    ObjectMeta {
        name: Some(name),
        namespace: owner.metadata.namespace.clone(),
        labels: Some(super::names::labels(&owner_name)),
        owner_references: owner.controller_owner_ref(&()).map(|r| vec![r]),
        ..ObjectMeta::default()
    }
}

fn controller_ref(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true))
}

/// Expected labels missing or changed, or controller reference not in place
pub fn metadata_drifted(expected: &ObjectMeta, reconciled: &ObjectMeta) -> bool {
    let empty = BTreeMap::new();
    let current = reconciled.labels.as_ref().unwrap_or(&empty);
    let labels_drifted = expected
        .labels
        .as_ref()
        .is_some_and(|labels| labels.iter().any(|(k, v)| current.get(k) != Some(v)));
    let owner_drifted = match controller_ref(expected) {
        Some(wanted) => controller_ref(reconciled).map(|r| &r.uid) != Some(&wanted.uid),
        None => false,
    };
    labels_drifted || owner_drifted
}

/// Merge expected labels and controller reference into `reconciled`
pub fn merge_metadata(expected: &ObjectMeta, reconciled: &mut ObjectMeta) {
    if let Some(labels) = &expected.labels {
        reconciled
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    if let Some(wanted) = controller_ref(expected) {
        let refs = reconciled.owner_references.get_or_insert_with(Vec::new);
        refs.retain(|r| r.controller != Some(true));
        refs.push(wanted.clone());
    }
}
