//! # Reconcile
//!
//! One pass of the SearchService state machine.
//!
//! A pass fetches the owner, validates it, resolves its backend association and
//! converges every dependent in order: HTTP service, CA, internal and public
//! certificates, configuration, deployment, remote trust secrets, status.
//! The secrets the pass depends on are recorded in the watch registry before
//! they are read. A successful pass requeues itself before the earliest
//! certificate rotation deadline.

use crate::constants::{CA_FILENAME, CERT_FILENAME, CONTROLLER_VERSION_ANNOTATION, MANAGED_ANNOTATION};
use crate::controller::association::Association;
use crate::controller::events::{Severity, REASON_ASSOCIATION_ERROR, REASON_RECONCILE_ERROR, REASON_VALIDATION};
use crate::controller::reconciler::converge::config::{converge_config, user_settings, BackendSettings};
use crate::controller::reconciler::converge::deployment::{converge_deployment, image, DeploymentInputs};
use crate::controller::reconciler::converge::remote_links::converge_remote_links;
use crate::controller::reconciler::converge::service::{converge_service, external_addresses};
use crate::controller::reconciler::converge::tls::{
    ensure_ca, ensure_internal_certs, ensure_public_certs, internal_sans, secret_value,
};
use crate::controller::reconciler::names;
use crate::controller::reconciler::status::{compute_status, update_status};
use crate::controller::reconciler::types::{Outcome, ReconcileError, Reconciler};
use crate::controller::store::{ObjectKey, Store};
use crate::controller::watches::SECRET_KIND;
use crate::crd::{SearchService, SearchServiceSpec};
use crate::observability;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Shortest requeue, so an overdue rotation does not spin
const MIN_REQUEUE: Duration = Duration::from_secs(1);

/// Delay until `deadline`, at least [`MIN_REQUEUE`]
pub fn requeue_after(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now)
        .to_std()
        .map_or(MIN_REQUEUE, |d| d.max(MIN_REQUEUE))
}

fn is_unmanaged(owner: &SearchService) -> bool {
    owner
        .annotations()
        .get(MANAGED_ANNOTATION)
        .is_some_and(|v| v.eq_ignore_ascii_case("false"))
}

impl<S: Store> Reconciler<S> {
    /// Run one pass for the SearchService at `key`.
    ///
    /// Passes for the same key never overlap, so a deletion observed while a
    /// pass is in flight is handled after that pass has registered its watches.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome, ReconcileError> {
        let lock = self.pass_lock(key);
        let guard = lock.lock().await;
        let result = self.run_pass(key).await;
        drop(guard);
        self.release_pass_lock(key, &lock);
        result
    }

    fn pass_lock(&self, key: &ObjectKey) -> Arc<tokio::sync::Mutex<()>> {
        self.pass_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone()
    }

    /// Forget the lock of `key` unless another pass holds or awaits it
    fn release_pass_lock(&self, key: &ObjectKey, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.pass_locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and `lock` itself
        if Arc::strong_count(lock) == 2 {
            locks.remove(key);
        }
    }

    async fn run_pass(&self, key: &ObjectKey) -> Result<Outcome, ReconcileError> {
        let Some(owner) = self.store.get::<SearchService>(key).await? else {
            info!(resource = %key, "SearchService no longer exists, releasing its watches");
            self.watches.unregister_all(key);
            return Ok(Outcome::done());
        };

        if is_unmanaged(&owner) {
            info!(resource = %key, "Skipping unmanaged SearchService ({MANAGED_ANNOTATION}=false)");
            return Ok(Outcome::done());
        }

        let owner_ref = owner.object_ref(&());
        let spec = match self.validator.validate(&owner) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(resource = %key, "Validation failed: {e}");
                self.events
                    .record(&owner_ref, Severity::Warning, REASON_VALIDATION, &e.to_string());
                return Err(e.into());
            }
        };

        let owner = self.stamp_controller_version(owner).await?;

        let association = self.association.resolve(&owner);
        if association == Association::Unresolved {
            info!(resource = %key, "Backend association not resolved yet");
            self.events.record(
                &owner_ref,
                Severity::Warning,
                REASON_ASSOCIATION_ERROR,
                "Search backend is not configured",
            );
            return Ok(Outcome::done());
        }

        match self.converge(key, owner, spec, &association).await {
            Err(e @ (ReconcileError::MissingReference { .. } | ReconcileError::Config(_))) => {
                self.events
                    .record(&owner_ref, Severity::Warning, REASON_RECONCILE_ERROR, &e.to_string());
                Err(e)
            }
            other => other,
        }
    }

    /// Record the running controller version on the owner
    async fn stamp_controller_version(
        &self,
        owner: SearchService,
    ) -> Result<SearchService, ReconcileError> {
        let version = &self.params.controller_version;
        if owner.annotations().get(CONTROLLER_VERSION_ANNOTATION) == Some(version) {
            return Ok(owner);
        }
        let mut updated = owner;
        updated
            .annotations_mut()
            .insert(CONTROLLER_VERSION_ANNOTATION.to_string(), version.clone());
        Ok(self.store.update(&updated).await?)
    }

    async fn converge(
        &self,
        key: &ObjectKey,
        owner: SearchService,
        spec: SearchServiceSpec,
        association: &Association,
    ) -> Result<Outcome, ReconcileError> {
        let now = Utc::now();
        let rotation = &self.params.cert_rotation;

        // Dependents are derived from the defaulted spec; the stored spec is never rewritten
        let mut desired = owner.clone();
        desired.spec = spec.clone();

        // Watched before they are read, so a secret created later triggers a pass
        self.watches.register(
            key,
            &names::config_ref_watch_tag(&key.name),
            SECRET_KIND,
            spec.config_ref_secret(),
        );
        self.watches.register(
            key,
            &names::http_certificate_watch_tag(&key.name),
            SECRET_KIND,
            spec.custom_certificate_secret(),
        );

        let backend = match association {
            Association::Resolved(connection) => Some(BackendSettings {
                connection: connection.clone(),
                password: self.backend_password(key, connection).await?,
            }),
            _ => None,
        };
        let user_certificate = self.referenced_secret(key, spec.custom_certificate_secret()).await?;
        let user_config = match self.referenced_secret(key, spec.config_ref_secret()).await? {
            Some(secret) => Some(user_settings(&secret)?),
            None => None,
        };

        let service = converge_service(&self.store, &desired).await?;
        let sans = internal_sans(&desired, &external_addresses(&service.object));

        let (ca, _) = ensure_ca(&self.store, &desired, &rotation.ca, now).await?;
        let (internal, leaf_deadline) = ensure_internal_certs(
            &self.store,
            &desired,
            &ca,
            &sans,
            user_certificate.as_ref(),
            &rotation.cert,
            now,
        )
        .await?;
        ensure_public_certs(&self.store, &desired, &internal.object).await?;

        let config = converge_config(&self.store, &desired, backend.as_ref(), user_config.as_ref()).await?;

        let inputs = DeploymentInputs {
            image: image(&desired, &self.params.image_repository),
            config_hash: &config.hash,
            backend_ca_secret: backend.as_ref().and_then(|b| b.connection.ca_secret()),
        };
        let deployment = converge_deployment(&self.store, &desired, &inputs).await?;

        let data = internal.object.data.as_ref();
        let trust_bundle = secret_value(data, CA_FILENAME)
            .or_else(|| secret_value(data, CERT_FILENAME))
            .unwrap_or_else(|| ca.cert_pem())
            .to_string();
        let linked = converge_remote_links(&self.store, owner, &spec.remote_links, &trust_bundle).await?;

        let status = compute_status(
            &linked.object,
            &deployment.object,
            association,
            &names::http_service(&key.name),
        );
        let (_, status_changed) = update_status(&self.store, linked.object, status).await?;
        debug!(resource = %key, status_changed, "Dependents converged");


        let ca_deadline = rotation.ca.deadline(ca.not_after());
        let deadline = leaf_deadline.map_or(ca_deadline, |leaf| leaf.min(ca_deadline));
        Ok(Outcome::requeue(requeue_after(deadline, now)))
    }

    async fn backend_password(
        &self,
        key: &ObjectKey,
        connection: &crate::controller::association::BackendConnection,
    ) -> Result<String, ReconcileError> {
        let secret_key = ObjectKey::new(key.namespace.clone(), connection.auth_secret_name.clone());
        let secret: Secret = self
            .store
            .get(&secret_key)
            .await?
            .ok_or_else(|| ReconcileError::MissingReference {
                kind: SECRET_KIND.to_string(),
                key: secret_key.clone(),
            })?;
        secret_value(secret.data.as_ref(), &connection.auth_secret_key)
            .map(str::to_string)
            .ok_or_else(|| {
                ReconcileError::Config(format!(
                    "secret {secret_key} has no key {}",
                    connection.auth_secret_key
                ))
            })
    }

    /// Secret named by the spec in the owner namespace
    async fn referenced_secret(
        &self,
        key: &ObjectKey,
        name: Option<&str>,
    ) -> Result<Option<Secret>, ReconcileError> {
        let Some(name) = name else {
            return Ok(None);
        };
        let secret_key = ObjectKey::new(key.namespace.clone(), name);
        match self.store.get::<Secret>(&secret_key).await? {
            Some(secret) => Ok(Some(secret)),
            None => Err(ReconcileError::MissingReference {
                kind: SECRET_KIND.to_string(),
                key: secret_key,
            }),
        }
    }

    /// Forget the error history of `key` after a successful pass
    pub fn reset_backoff(&self, key: &ObjectKey) {
        self.backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key.to_string());
    }
}

/// kube-runtime entry point
pub async fn reconcile<S: Store>(
    obj: Arc<SearchService>,
    ctx: Arc<Reconciler<S>>,
) -> Result<Action, ReconcileError> {
    let key = ObjectKey::of(obj.as_ref());
    let span = info_span!(
        "controller.reconcile",
        resource.name = %key.name,
        resource.namespace = %key.namespace,
        resource.kind = "SearchService"
    );

    async move {
        let start = Instant::now();
        observability::metrics::increment_reconciliations();
        let result = ctx.reconcile(&key).await;
        observability::metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        let outcome = result?;
        ctx.reset_backoff(&key);
        Ok(match outcome.requeue_after {
            Some(after) => {
                debug!("Requeue in {}s for certificate rotation", after.as_secs());
                observability::metrics::increment_requeues_total("certificate-rotation");
                Action::requeue(after)
            }
            None => Action::await_change(),
        })
    }
    .instrument(span)
    .await
}
