//! # Error Policy
//!
//! Error handling and backoff for the controller watch loop.
//!
//! A write conflict means another writer got there first; the pass is retried
//! almost immediately against fresh state. Every other error backs off per
//! resource along a Fibonacci sequence of minutes, reset by the next success.

use crate::constants;
use crate::controller::reconciler::{BackoffState, ReconcileError, Reconciler};
use crate::controller::store::{ObjectKey, Store};
use crate::crd::SearchService;
use crate::observability;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tracing::{error, info, warn};

/// Next retry delay for `key` after `error`
pub fn retry_delay<S: Store>(ctx: &Reconciler<S>, key: &ObjectKey, error: &ReconcileError) -> Duration {
    if error.is_conflict() {
        return Duration::from_secs(constants::DEFAULT_CONFLICT_REQUEUE_SECS);
    }
    let mut states = ctx
        .backoff_states
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    let state = states.entry(key.to_string()).or_insert_with(|| {
        BackoffState::new(constants::BACKOFF_MIN_MINUTES, constants::BACKOFF_MAX_MINUTES)
    });
    state.increment_error();
    let seconds = state.backoff.next_backoff_seconds();
    info!(
        "Retrying {key} with Fibonacci backoff: {seconds}s (error count: {})",
        state.error_count
    );
    Duration::from_secs(seconds)
}

/// Handle reconciliation errors
pub fn error_policy<S: Store>(
    obj: Arc<SearchService>,
    error: &ReconcileError,
    ctx: Arc<Reconciler<S>>,
) -> Action {
    let key = ObjectKey::of(obj.as_ref());
    let _span = tracing::error_span!(
        "controller.watch.reconciliation_error",
        resource.name = %key.name,
        resource.namespace = %key.namespace,
        error.kind = error.kind()
    )
    .entered();

    if error.is_conflict() {
        info!("Conflict reconciling {key}, retrying: {error}");
        observability::metrics::increment_requeues_total("conflict");
    } else {
        error!("Reconciliation error for {key}: {error}");
        observability::metrics::increment_requeues_total("error-backoff");
    }
    observability::metrics::increment_reconciliation_errors(error.kind());
    Action::requeue(retry_delay(&ctx, &key, error))
}

/// Classify a watch stream error and wait before the stream restarts.
///
/// Returns `Some(())` when the error is benign and the stream continues, `None`
/// when the stream should be restarted.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &AtomicU64,
    max_backoff_ms: u64,
) -> Option<()> {
    let is_401 = error_string.contains("401") || error_string.contains("Unauthorized");
    let is_410 = error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone");
    let is_429 = error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests");
    let is_not_found = error_string.contains("ObjectNotFound")
        || (error_string.contains("404") && error_string.contains("not found"));

    if is_401 {
        error!("Watch authentication failed (401 Unauthorized), check the {} service account RBAC", constants::CONTROLLER_NAME);
        tokio::time::sleep(Duration::from_secs(constants::DEFAULT_WATCH_RESTART_DELAY_SECS)).await;
        None
    } else if is_410 {
        warn!(error_type = "410", "Watch resource version expired, restarting watch");
        None
    } else if is_429 {
        let current = backoff.load(Ordering::Relaxed);
        warn!("API server storage reinitializing (429), backing off for {current}ms");
        tokio::time::sleep(Duration::from_millis(current)).await;
        backoff.store(current.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
        None
    } else if is_not_found {
        warn!("Resource not found (likely deleted), continuing watch");
        Some(())
    } else {
        error!("Controller stream error: {error_string}");
        tokio::time::sleep(Duration::from_secs(constants::DEFAULT_WATCH_RESTART_DELAY_SECS)).await;
        None
    }
}
