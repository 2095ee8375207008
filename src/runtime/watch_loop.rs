//! # Watch Loop
//!
//! Runs the SearchService controller until shutdown.
//!
//! The controller watches SearchServices and the dependents they own. User
//! secrets referenced by a spec are not owned, so secret events are mapped
//! back to the SearchServices that registered them in the watch registry. A
//! separate owner watcher forwards deletions, which the controller itself
//! never reconciles, so their watch registrations are released.

use crate::config::ControllerConfig;
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::controller::store::{KubeStore, ObjectKey};
use crate::controller::watches::{WatchRegistry, SECRET_KIND};
use crate::crd::SearchService;
use crate::runtime::error_policy::{error_policy, handle_watch_stream_error};
use anyhow::Result;
use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::{Controller, WatchStreamExt};
use kube::{Api, Client, Resource};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Watch timeout (seconds); below the client read timeout so idle watches close cleanly
const WATCH_TIMEOUT_SECS: u32 = 25;

const INITIAL_STREAM_BACKOFF_MS: u64 = 1_000;
const MAX_STREAM_BACKOFF_MS: u64 = 30_000;

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Owners that registered a watch on `secret`
pub fn secret_owners(registry: &WatchRegistry, secret: &Secret) -> Vec<ObjectRef<SearchService>> {
    registry
        .owners_of(SECRET_KIND, &ObjectKey::of(secret))
        .into_iter()
        .map(|owner| ObjectRef::new(&owner.name).within(&owner.namespace))
        .collect()
}

/// SearchService watch events, backing off while the API server keeps failing
fn owner_events(
    api: Api<SearchService>,
) -> impl Stream<Item = Result<watcher::Event<SearchService>, watcher::Error>> + Send {
    watcher::watcher(api, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)).default_backoff()
}

/// Release the watches of deleted owners
async fn watch_owner_deletions(api: Api<SearchService>, ctx: Arc<Reconciler<KubeStore>>) {
    let mut events = owner_events(api).boxed();
    while let Some(event) = events.next().await {
        match event {
            Ok(watcher::Event::Delete(owner)) => {
                let key = ObjectKey::of(&owner);
                debug!(resource = %key, "SearchService deleted");
                if let Err(e) = ctx.reconcile(&key).await {
                    warn!(resource = %key, "Failed to clean up deleted SearchService: {e}");
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Owner deletion watch error: {e}"),
        }
    }
}

/// Run the controller until a shutdown signal arrives
pub async fn run_watch_loop(
    client: Client,
    config: &ControllerConfig,
    reconciler: Arc<Reconciler<KubeStore>>,
    server_state: Arc<ServerState>,
) -> Result<()> {
    let namespace = config.watch_namespace.as_deref();
    match namespace {
        Some(ns) => info!("Watching SearchService resources in namespace {ns}"),
        None => info!("Watching SearchService resources in all namespaces"),
    }

    let owners: Api<SearchService> = api(&client, namespace);
    let watcher_config = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);

    let deletions = tokio::spawn(watch_owner_deletions(owners.clone(), reconciler.clone()));

    let registry = reconciler.watches.clone();
    let stream_backoff = Arc::new(AtomicU64::new(INITIAL_STREAM_BACKOFF_MS));

    Controller::new(owners, watcher_config())
        .owns(api::<Service>(&client, namespace), watcher_config())
        .owns(api::<Deployment>(&client, namespace), watcher_config())
        .owns(api::<Secret>(&client, namespace), watcher_config())
        .watches(api::<Secret>(&client, namespace), watcher_config(), move |secret| {
            secret_owners(&registry, &secret)
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|result| {
            let stream_backoff = stream_backoff.clone();
            async move {
                match result {
                    Ok((obj, _action)) => {
                        stream_backoff.store(INITIAL_STREAM_BACKOFF_MS, Ordering::Relaxed);
                        debug!(resource.name = %obj.name, "Reconciled");
                    }
                    Err(e) => {
                        let _ = handle_watch_stream_error(&e.to_string(), &stream_backoff, MAX_STREAM_BACKOFF_MS)
                            .await;
                    }
                }
            }
        })
        .await;

    info!("Controller stream ended, shutting down");
    server_state.is_ready.store(false, Ordering::Relaxed);
    deletions.abort();
    if let Err(e) = deletions.await {
        if !e.is_cancelled() {
            error!("Owner deletion watcher failed: {e}");
        }
    }
    Ok(())
}
