//! # Dynamic Watch Registry
//!
//! Tracks which externally-referenced objects each owner depends on, so events
//! on those objects can be mapped back to the owners that must be reconciled.
//!
//! Registrations are keyed by `(owner, tag)`. Registering a tag replaces its
//! previous name set; registering an empty set removes the tag. A reverse index
//! from watched object to owners is maintained under the same lock.

use crate::controller::store::ObjectKey;
use crate::observability;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};

/// Kind label used for secret registrations
pub const SECRET_KIND: &str = "Secret";

/// One tagged registration of an owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub kind: String,
    /// Watched object names, in the owner's namespace
    pub names: BTreeSet<String>,
}

/// Snapshot entry returned by [`WatchRegistry::registrations`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationEntry {
    pub owner: ObjectKey,
    pub tag: String,
    pub kind: String,
    pub watched: ObjectKey,
}

#[derive(Debug, Default)]
struct Inner {
    by_owner: BTreeMap<ObjectKey, BTreeMap<String, Registration>>,
    by_watched: BTreeMap<(String, ObjectKey), BTreeSet<ObjectKey>>,
}

impl Inner {
    fn unindex(&mut self, owner: &ObjectKey, registration: &Registration) {
        for name in &registration.names {
            let key = (
                registration.kind.clone(),
                ObjectKey::new(owner.namespace.clone(), name.clone()),
            );
            // Another tag of the same owner may still reference this object
            let still_referenced = self.by_owner.get(owner).is_some_and(|tags| {
                tags.values()
                    .any(|r| r.kind == registration.kind && r.names.contains(name))
            });
            if still_referenced {
                continue;
            }
            if let Some(owners) = self.by_watched.get_mut(&key) {
                owners.remove(owner);
                if owners.is_empty() {
                    self.by_watched.remove(&key);
                }
            }
        }
    }

    fn index(&mut self, owner: &ObjectKey, registration: &Registration) {
        for name in &registration.names {
            self.by_watched
                .entry((
                    registration.kind.clone(),
                    ObjectKey::new(owner.namespace.clone(), name.clone()),
                ))
                .or_default()
                .insert(owner.clone());
        }
    }

    fn watched_count(&self) -> usize {
        self.by_watched.len()
    }
}

/// Process-wide registry injected into the reconciler
#[derive(Debug, Default)]
pub struct WatchRegistry {
    inner: Mutex<Inner>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the names watched by `owner` under `tag`
    pub fn register<I, S>(&self, owner: &ObjectKey, tag: &str, kind: &str, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names
            .into_iter()
            .map(Into::into)
            .filter(|n: &String| !n.is_empty())
            .collect();
        let mut inner = self.lock();

        let previous = inner
            .by_owner
            .get_mut(owner)
            .and_then(|tags| tags.remove(tag));
        if let Some(previous) = previous {
            inner.unindex(owner, &previous);
        }

        if !names.is_empty() {
            let registration = Registration {
                kind: kind.to_string(),
                names,
            };
            inner.index(owner, &registration);
            inner
                .by_owner
                .entry(owner.clone())
                .or_default()
                .insert(tag.to_string(), registration);
        }
        if inner.by_owner.get(owner).is_some_and(BTreeMap::is_empty) {
            inner.by_owner.remove(owner);
        }

        observability::metrics::set_watched_secrets(inner.watched_count());
    }

    /// Drop every registration of `owner`
    pub fn unregister_all(&self, owner: &ObjectKey) {
        let mut inner = self.lock();
        if let Some(tags) = inner.by_owner.remove(owner) {
            for registration in tags.values() {
                inner.unindex(owner, registration);
            }
        }
        observability::metrics::set_watched_secrets(inner.watched_count());
    }

    /// Secret names currently watched on behalf of `owner`
    pub fn watched_secret_names(&self, owner: &ObjectKey) -> BTreeSet<String> {
        self.lock()
            .by_owner
            .get(owner)
            .map(|tags| {
                tags.values()
                    .filter(|r| r.kind == SECRET_KIND)
                    .flat_map(|r| r.names.iter().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Owners that registered a watch on the given object
    pub fn owners_of(&self, kind: &str, watched: &ObjectKey) -> Vec<ObjectKey> {
        self.lock()
            .by_watched
            .get(&(kind.to_string(), watched.clone()))
            .map(|owners| owners.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Flattened snapshot of all registrations
    pub fn registrations(&self) -> Vec<RegistrationEntry> {
        let inner = self.lock();
        inner
            .by_owner
            .iter()
            .flat_map(|(owner, tags)| {
                tags.iter().flat_map(move |(tag, registration)| {
                    registration.names.iter().map(move |name| RegistrationEntry {
                        owner: owner.clone(),
                        tag: tag.clone(),
                        kind: registration.kind.clone(),
                        watched: ObjectKey::new(owner.namespace.clone(), name.clone()),
                    })
                })
            })
            .collect()
    }
}
