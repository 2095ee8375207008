//! # In-Memory Store
//!
//! [`Store`] holding objects as JSON in a map. Mirrors the API server's
//! optimistic concurrency: every write bumps `resourceVersion`, and an update
//! carrying a stale `resourceVersion` fails with [`StoreError::Conflict`].
//! Writes are counted so callers can assert idempotence.

use super::{Object, ObjectKey, Store, StoreError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

type Entry = (String, ObjectKey);

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<Entry, serde_json::Value>>,
    resource_version: AtomicU64,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of create/update/update_status/delete calls that changed state
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored objects of kind `K`
    pub fn count<K: Object>(&self) -> usize {
        let kind = K::kind(&()).to_string();
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    fn next_resource_version(&self) -> String {
        (self.resource_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn entry<K: Object>(key: &ObjectKey) -> Entry {
        (K::kind(&()).to_string(), key.clone())
    }

    /// Serialize `obj` with the given resourceVersion and apiVersion/kind set
    fn to_stored<K: Object>(obj: &K, resource_version: String) -> Result<serde_json::Value, StoreError> {
        let mut obj = obj.clone();
        obj.meta_mut().resource_version = Some(resource_version);
        let mut value = serde_json::to_value(&obj)?;
        if let Some(map) = value.as_object_mut() {
            map.insert("apiVersion".to_string(), K::api_version(&()).into());
            map.insert("kind".to_string(), K::kind(&()).into());
        }
        Ok(value)
    }

    fn stale<K: Object>(obj: &K, stored: &serde_json::Value) -> bool {
        let stored_version = stored
            .pointer("/metadata/resourceVersion")
            .and_then(serde_json::Value::as_str);
        match (obj.meta().resource_version.as_deref(), stored_version) {
            (Some(given), Some(current)) => given != current,
            _ => false,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get<K: Object>(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        let objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        objects
            .get(&Self::entry::<K>(key))
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(obj);
        let entry = Self::entry::<K>(&key);
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        if objects.contains_key(&entry) {
            return Err(StoreError::AlreadyExists {
                kind: entry.0,
                key,
            });
        }
        let mut obj = obj.clone();
        let meta = obj.meta_mut();
        if meta.uid.is_none() {
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        if meta.namespace.is_none() {
            meta.namespace = Some(key.namespace.clone());
        }
        let value = Self::to_stored(&obj, self.next_resource_version())?;
        let created: K = serde_json::from_value(value.clone())?;
        objects.insert(entry, value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn update<K: Object>(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(obj);
        let entry = Self::entry::<K>(&key);
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(stored) = objects.get(&entry) else {
            return Err(StoreError::NotFound {
                kind: entry.0,
                key,
            });
        };
        if Self::stale(obj, stored) {
            return Err(StoreError::Conflict {
                kind: entry.0,
                key,
            });
        }
        let mut obj = obj.clone();
        // uid and status are owned by the platform, not by full-object updates
        obj.meta_mut().uid = stored
            .pointer("/metadata/uid")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        let mut value = Self::to_stored(&obj, self.next_resource_version())?;
        if let (Some(map), Some(status)) = (value.as_object_mut(), stored.get("status")) {
            map.insert("status".to_string(), status.clone());
        }
        let updated: K = serde_json::from_value(value.clone())?;
        objects.insert(entry, value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn update_status<K: Object>(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(obj);
        let entry = Self::entry::<K>(&key);
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(stored) = objects.get_mut(&entry) else {
            return Err(StoreError::NotFound {
                kind: entry.0,
                key,
            });
        };
        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        if let Some(map) = stored.as_object_mut() {
            map.insert("status".to_string(), status);
        }
        let resource_version = self.next_resource_version();
        if let Some(meta) = stored.get_mut("metadata").and_then(serde_json::Value::as_object_mut) {
            meta.insert("resourceVersion".to_string(), resource_version.into());
        }
        let updated: K = serde_json::from_value(stored.clone())?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn delete<K: Object>(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        if objects.remove(&Self::entry::<K>(key)).is_some() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
