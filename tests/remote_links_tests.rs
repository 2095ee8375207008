//! Managed-set annotation and remote trust secrets.

use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use search_operator::constants::{CA_FILENAME, MANAGED_REMOTE_LINKS_ANNOTATION};
use search_operator::controller::events::{EventRecorder, FakeRecorder};
use search_operator::controller::managed_set;
use search_operator::controller::reconciler::{ReconcileError, Reconciler, ReconcilerParams};
use search_operator::controller::store::{MemoryStore, ObjectKey, Store};
use search_operator::crd::{RemoteLink, SearchService, SearchServiceSpec};
use std::collections::BTreeSet;
use std::sync::Arc;

fn owner(links: &[(&str, &str)]) -> SearchService {
    owner_in("default", links)
}

fn owner_in(namespace: &str, links: &[(&str, &str)]) -> SearchService {
    SearchService {
        metadata: ObjectMeta {
            name: Some("sample".to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        spec: SearchServiceSpec {
            version: "7.7.0".to_string(),
            remote_links: links
                .iter()
                .map(|(namespace, name)| RemoteLink {
                    name: (*name).to_string(),
                    namespace: (*namespace).to_string(),
                })
                .collect(),
            ..SearchServiceSpec::default()
        },
        status: None,
    }
}

fn reconciler() -> Reconciler<MemoryStore> {
    let recorder: Arc<dyn EventRecorder> = Arc::new(FakeRecorder::default());
    Reconciler::new(MemoryStore::new(), ReconcilerParams::default(), recorder)
}

async fn trust_secret(store: &MemoryStore, namespace: &str, peer: &str) -> Option<Secret> {
    trust_secret_of(store, "default", namespace, peer).await
}

async fn trust_secret_of(
    store: &MemoryStore,
    owner_namespace: &str,
    namespace: &str,
    peer: &str,
) -> Option<Secret> {
    store
        .get(&ObjectKey::new(
            namespace,
            format!("{owner_namespace}-sample-{peer}-search-remote-ca"),
        ))
        .await
        .expect("get trust secret")
}

fn ca_of(secret: &Secret) -> Vec<u8> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(CA_FILENAME))
        .map(|v| v.0.clone())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_snapshot_round_trip_is_sorted() {
    let store = MemoryStore::new();
    let created = store.create(&owner(&[])).await.expect("create owner");
    let desired = BTreeSet::from(["zeta/b".to_string(), "alpha/a".to_string(), "mid/c".to_string()]);

    let updated = managed_set::write_snapshot(&store, &created, MANAGED_REMOTE_LINKS_ANNOTATION, &desired)
        .await
        .expect("write snapshot");

    assert_eq!(
        managed_set::read_snapshot(&updated, MANAGED_REMOTE_LINKS_ANNOTATION),
        desired
    );
    let raw = updated
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(MANAGED_REMOTE_LINKS_ANNOTATION))
        .cloned();
    assert_eq!(raw.as_deref(), Some("alpha/a,mid/c,zeta/b"));
}

#[tokio::test]
async fn test_snapshot_rejects_members_that_would_not_read_back() {
    let store = MemoryStore::new();
    let created = store.create(&owner(&[])).await.expect("create owner");
    let writes = store.write_count();

    for bad in ["", " padded/peer", "a/b,c/d"] {
        let desired = BTreeSet::from(["ok/peer".to_string(), bad.to_string()]);
        let result =
            managed_set::write_snapshot(&store, &created, MANAGED_REMOTE_LINKS_ANNOTATION, &desired).await;
        assert!(matches!(result, Err(ReconcileError::Config(_))), "{bad:?} accepted");
    }
    assert_eq!(store.write_count(), writes);
}

#[tokio::test]
async fn test_remote_links_follow_the_spec() {
    let ctx = reconciler();
    let key = ObjectKey::new("default", "sample");
    ctx.store
        .create(&owner(&[("team-a", "peer-a"), ("team-b", "peer-b")]))
        .await
        .expect("create owner");

    ctx.reconcile(&key).await.expect("first pass");

    let secret = trust_secret(&ctx.store, "team-a", "peer-a").await.expect("peer-a trust secret");
    assert!(secret.data.as_ref().is_some_and(|d| d.contains_key(CA_FILENAME)));
    assert!(trust_secret(&ctx.store, "team-b", "peer-b").await.is_some());

    let stored: SearchService = ctx.store.get(&key).await.expect("get").expect("owner");
    assert_eq!(
        managed_set::read_snapshot(&stored, MANAGED_REMOTE_LINKS_ANNOTATION),
        BTreeSet::from(["team-a/peer-a".to_string(), "team-b/peer-b".to_string()])
    );

    let mut narrowed = stored;
    narrowed.spec.remote_links.retain(|link| link.name == "peer-a");
    ctx.store.update(&narrowed).await.expect("drop peer-b");
    ctx.reconcile(&key).await.expect("second pass");

    assert!(trust_secret(&ctx.store, "team-a", "peer-a").await.is_some());
    assert!(trust_secret(&ctx.store, "team-b", "peer-b").await.is_none());
    let stored: SearchService = ctx.store.get(&key).await.expect("get").expect("owner");
    assert_eq!(
        managed_set::read_snapshot(&stored, MANAGED_REMOTE_LINKS_ANNOTATION),
        BTreeSet::from(["team-a/peer-a".to_string()])
    );

    let writes = ctx.store.write_count();
    ctx.reconcile(&key).await.expect("steady state");
    assert_eq!(ctx.store.write_count(), writes);
}

#[tokio::test]
async fn test_same_named_owners_in_different_namespaces_link_one_peer() {
    let ctx = reconciler();
    let first = ObjectKey::new("ns1", "sample");
    let second = ObjectKey::new("ns2", "sample");
    ctx.store
        .create(&owner_in("ns1", &[("shared", "peer")]))
        .await
        .expect("create ns1 owner");
    ctx.store
        .create(&owner_in("ns2", &[("shared", "peer")]))
        .await
        .expect("create ns2 owner");

    ctx.reconcile(&first).await.expect("ns1 first pass");
    ctx.reconcile(&second).await.expect("ns2 first pass");

    let from_first = trust_secret_of(&ctx.store, "ns1", "shared", "peer")
        .await
        .expect("ns1 trust secret");
    let from_second = trust_secret_of(&ctx.store, "ns2", "shared", "peer")
        .await
        .expect("ns2 trust secret");
    assert_ne!(ca_of(&from_first), ca_of(&from_second));

    let writes = ctx.store.write_count();
    ctx.reconcile(&first).await.expect("ns1 steady state");
    ctx.reconcile(&second).await.expect("ns2 steady state");
    assert_eq!(ctx.store.write_count(), writes);

    let mut unlinked: SearchService = ctx.store.get(&second).await.expect("get").expect("ns2 owner");
    unlinked.spec.remote_links.clear();
    ctx.store.update(&unlinked).await.expect("drop ns2 link");
    ctx.reconcile(&second).await.expect("ns2 unlink pass");

    assert!(trust_secret_of(&ctx.store, "ns2", "shared", "peer").await.is_none());
    let kept = trust_secret_of(&ctx.store, "ns1", "shared", "peer")
        .await
        .expect("ns1 trust secret survives");
    assert_eq!(ca_of(&kept), ca_of(&from_first));
}
