//! # Remote Links
//!
//! Publishes this service's CA into the namespace of each linked peer.
//!
//! Trust secrets live in other namespaces, so they cannot be owned by the
//! SearchService and are not garbage collected with it. The set of links the
//! operator created is tracked in the managed-remote-links annotation. The
//! annotation is widened before any secret is created and narrowed only after
//! removed secrets are deleted, so a crash in between never loses track of a
//! secret.

use super::tls::converge_secret;
use super::Applied;
use crate::constants::{
    CA_FILENAME, MANAGED_REMOTE_LINKS_ANNOTATION, REMOTE_OWNER_NAMESPACE_LABEL,
    REMOTE_OWNER_NAME_LABEL, TYPE_LABEL, TYPE_LABEL_VALUE,
};
use crate::controller::managed_set;
use crate::controller::reconciler::names;
use crate::controller::reconciler::types::ReconcileError;
use crate::controller::store::{ObjectKey, Store};
use crate::crd::{RemoteLink, SearchService};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Trust secret for `link`, holding `ca_pem` as `ca.crt`
pub fn expected_trust_secret(owner: &SearchService, link: &RemoteLink, ca_pem: &str) -> Secret {
    let owner_name = owner.metadata.name.clone().unwrap_or_default();
    let owner_namespace = owner.metadata.namespace.clone().unwrap_or_default();
    Secret {
        metadata: ObjectMeta {
            name: Some(names::remote_ca_secret(&owner_namespace, &owner_name, &link.name)),
            namespace: Some(link.namespace.clone()),
            labels: Some(BTreeMap::from([
                (TYPE_LABEL.to_string(), TYPE_LABEL_VALUE.to_string()),
                (REMOTE_OWNER_NAME_LABEL.to_string(), owner_name),
                (REMOTE_OWNER_NAMESPACE_LABEL.to_string(), owner_namespace),
            ])),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(
            CA_FILENAME.to_string(),
            ByteString(ca_pem.as_bytes().to_vec()),
        )])),
        ..Secret::default()
    }
}

/// Converge trust secrets for `links`, returning the (possibly updated) owner
pub async fn converge_remote_links<S: Store>(
    store: &S,
    owner: SearchService,
    links: &[RemoteLink],
    ca_pem: &str,
) -> Result<Applied<SearchService>, ReconcileError> {
    let mut owner = owner;
    let mut changed = false;
    let owner_name = owner.metadata.name.clone().unwrap_or_default();
    let owner_namespace = owner.metadata.namespace.clone().unwrap_or_default();

    let current = managed_set::read_snapshot(&owner, MANAGED_REMOTE_LINKS_ANNOTATION);
    let desired: BTreeSet<String> = links.iter().map(RemoteLink::id).collect();
    let (added, removed) = managed_set::diff(&current, &desired);

    if !added.is_empty() {
        let widened: BTreeSet<String> = current.union(&desired).cloned().collect();
        owner = managed_set::write_snapshot(store, &owner, MANAGED_REMOTE_LINKS_ANNOTATION, &widened).await?;
        changed = true;
    }

    for link in links {
        let applied = converge_secret(store, expected_trust_secret(&owner, link, ca_pem)).await?;
        changed |= applied.changed;
    }

    for id in &removed {
        let Some(link) = RemoteLink::from_id(id) else {
            warn!(id = %id, "Dropping malformed remote link id from {MANAGED_REMOTE_LINKS_ANNOTATION}");
            continue;
        };
        info!(link = %id, "Removing remote trust secret");
        store
            .delete::<Secret>(&ObjectKey::new(
                link.namespace.clone(),
                names::remote_ca_secret(&owner_namespace, &owner_name, &link.name),
            ))
            .await?;
    }

    if !removed.is_empty() {
        owner = managed_set::write_snapshot(store, &owner, MANAGED_REMOTE_LINKS_ANNOTATION, &desired).await?;
        changed = true;
    }

    Ok(Applied {
        object: owner,
        changed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::SearchServiceSpec;

    #[test]
    fn test_trust_secret_lives_in_peer_namespace() {
        let owner = SearchService {
            metadata: ObjectMeta {
                name: Some("sample".to_string()),
                namespace: Some("ns".to_string()),
                ..ObjectMeta::default()
            },
            spec: SearchServiceSpec::default(),
            status: None,
        };
        let link = RemoteLink {
            name: "peer".to_string(),
            namespace: "other".to_string(),
        };
        let secret = expected_trust_secret(&owner, &link, "PEM");
        assert_eq!(secret.metadata.name.as_deref(), Some("ns-sample-peer-search-remote-ca"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("other"));
        assert!(secret.metadata.owner_references.is_none());
    }
}
