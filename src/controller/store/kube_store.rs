//! # Kubernetes Store
//!
//! [`Store`] backed by the Kubernetes API server.

use super::{Object, ObjectKey, Store, StoreError};
use crate::constants::CONTROLLER_NAME;
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

/// Store writing through a kube [`Client`]
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: Object>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Classify API errors into store errors
fn classify<K: Object>(error: kube::Error, key: &ObjectKey) -> StoreError {
    let kind = K::kind(&()).to_string();
    match error {
        kube::Error::Api(api_err) if api_err.code == 409 && api_err.reason == "AlreadyExists" => {
            StoreError::AlreadyExists {
                kind,
                key: key.clone(),
            }
        }
        kube::Error::Api(api_err) if api_err.code == 409 => StoreError::Conflict {
            kind,
            key: key.clone(),
        },
        kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound {
            kind,
            key: key.clone(),
        },
        other => StoreError::Kube(other),
    }
}

#[async_trait]
impl Store for KubeStore {
    async fn get<K: Object>(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        let api = self.api::<K>(&key.namespace);
        api.get_opt(&key.name).await.map_err(|e| classify::<K>(e, key))
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(obj);
        debug!(kind = %K::kind(&()), object = %key, "store.create");
        let api = self.api::<K>(&key.namespace);
        let params = PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..PostParams::default()
        };
        api.create(&params, obj)
            .await
            .map_err(|e| classify::<K>(e, &key))
    }

    async fn update<K: Object>(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(obj);
        debug!(kind = %K::kind(&()), object = %key, "store.update");
        let api = self.api::<K>(&key.namespace);
        let params = PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..PostParams::default()
        };
        api.replace(&key.name, &params, obj)
            .await
            .map_err(|e| classify::<K>(e, &key))
    }

    async fn update_status<K: Object>(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(obj);
        debug!(kind = %K::kind(&()), object = %key, "store.update_status");
        let api = self.api::<K>(&key.namespace);
        let value = serde_json::to_value(obj)?;
        let patch = serde_json::json!({
            "status": value.get("status").cloned().unwrap_or(serde_json::Value::Null)
        });
        api.patch_status(
            &key.name,
            &PatchParams::apply(CONTROLLER_NAME),
            &Patch::Merge(patch),
        )
        .await
        .map_err(|e| classify::<K>(e, &key))
    }

    async fn delete<K: Object>(&self, key: &ObjectKey) -> Result<(), StoreError> {
        debug!(kind = %K::kind(&()), object = %key, "store.delete");
        let api = self.api::<K>(&key.namespace);
        match api.delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(e) => Err(classify::<K>(e, key)),
        }
    }
}
