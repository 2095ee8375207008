//! # Platform Storage
//!
//! Uniform get/create/update/delete over typed Kubernetes objects.
//!
//! The reconciler only talks to the platform through [`Store`], so the same
//! convergence code runs against the API server ([`KubeStore`]) and against
//! the in-memory store used by tests ([`MemoryStore`]).

mod kube_store;
mod memory;

pub use kube_store::KubeStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Any namespaced object the operator reads or writes
pub trait Object:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> Object for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Namespace + name identity of an object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of an existing object
    pub fn of<K: Resource>(obj: &K) -> Self {
        let meta = obj.meta();
        Self {
            namespace: meta.namespace.clone().unwrap_or_else(|| "default".to_string()),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic-concurrency failure: the object changed since it was read
    #[error("conflict writing {kind} {key}")]
    Conflict { kind: String, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: ObjectKey },

    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: ObjectKey },

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Platform storage contract
///
/// `update` is a full replace guarded by the object's resourceVersion;
/// `update_status` writes only the status subresource.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get<K: Object>(&self, key: &ObjectKey) -> Result<Option<K>, StoreError>;

    async fn create<K: Object>(&self, obj: &K) -> Result<K, StoreError>;

    async fn update<K: Object>(&self, obj: &K) -> Result<K, StoreError>;

    async fn update_status<K: Object>(&self, obj: &K) -> Result<K, StoreError>;

    /// Deleting a missing object is not an error
    async fn delete<K: Object>(&self, key: &ObjectKey) -> Result<(), StoreError>;
}
