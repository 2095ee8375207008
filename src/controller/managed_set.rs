//! # Managed Set Tracker
//!
//! Remembers, in an annotation on the owner, the identifiers of objects the
//! operator created that cannot carry an owner reference (cross-namespace).
//!
//! The annotation value is the sorted, comma-joined set. A missing annotation
//! reads as the empty set. Members must be non-empty, trimmed and free of
//! commas; [`write_snapshot`] rejects anything else.

use crate::controller::reconciler::ReconcileError;
use crate::controller::store::{Object, Store};
use kube::Resource;
use std::collections::BTreeSet;

/// Parse the set stored under `annotation` on `owner`
pub fn read_snapshot<K: Resource>(owner: &K, annotation: &str) -> BTreeSet<String> {
    owner
        .meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotation))
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// `(added, removed)` going from `current` to `desired`
pub fn diff(
    current: &BTreeSet<String>,
    desired: &BTreeSet<String>,
) -> (BTreeSet<String>, BTreeSet<String>) {
    (
        desired.difference(current).cloned().collect(),
        current.difference(desired).cloned().collect(),
    )
}

/// Deterministic annotation value for `set`
pub fn serialize(set: &BTreeSet<String>) -> String {
    set.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

/// Whether `id` reads back unchanged from a serialized set
fn round_trips(id: &str) -> bool {
    !id.is_empty() && id.trim() == id && !id.contains(',')
}

/// Persist `desired` on the owner, returning the updated owner.
///
/// Callers only invoke this when the set differs from [`read_snapshot`].
pub async fn write_snapshot<S: Store, K: Object>(
    store: &S,
    owner: &K,
    annotation: &str,
    desired: &BTreeSet<String>,
) -> Result<K, ReconcileError> {
    if let Some(id) = desired.iter().find(|id| !round_trips(id)) {
        return Err(ReconcileError::Config(format!(
            "{annotation} cannot hold member {id:?}"
        )));
    }
    let mut updated = owner.clone();
    let annotations = updated.meta_mut().annotations.get_or_insert_with(Default::default);
    annotations.insert(annotation.to_string(), serialize(desired));
    Ok(store.update(&updated).await?)
}
