//! # Configuration Bundle
//!
//! Renders `search.yml` and stores it in the configuration secret.
//!
//! The document is a flat map of dotted keys serialized in key order, so
//! identical logical inputs always render identical bytes and the same hash.
//! Generated secrets (session key, encryption keys) are carried over from the
//! existing bundle so re-rendering does not rotate them.

use super::tls::{converge_secret, secret_value};
use super::{dependent_meta, Applied};
use crate::constants::{CERT_FILENAME, CONFIG_FILENAME, HTTP_CERTS_MOUNT_PATH, HTTP_PORT, KEY_FILENAME};
use crate::controller::association::BackendConnection;
use crate::controller::reconciler::names;
use crate::controller::reconciler::types::ReconcileError;
use crate::controller::store::{ObjectKey, Store};
use crate::crd::SearchService;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Mount path of the backend CA inside the container
pub const BACKEND_CA_MOUNT_PATH: &str = "/mnt/search/backend-certs";

const SESSION_KEY: &str = "secret_session_key";
const ENCRYPTION_KEYS: &str = "secret_management.encryption_keys";

pub type Settings = BTreeMap<String, Value>;

/// Backend connection with its resolved password
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub connection: BackendConnection,
    pub password: String,
}

/// Rendered configuration and its content hash
#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub applied: Applied<Secret>,
    pub hash: String,
}

/// 64 hex characters of randomness
fn random_key() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

/// Flatten nested mappings into dotted keys
pub fn flatten(prefix: Option<&str>, value: Value, out: &mut Settings) {
    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                let key = match &k {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => continue,
                };
                let key = prefix.map_or_else(|| key.clone(), |p| format!("{p}.{key}"));
                flatten(Some(&key), v, out);
            }
        }
        other => {
            if let Some(prefix) = prefix {
                out.insert(prefix.to_string(), other);
            }
        }
    }
}

/// Parse a rendered or user-provided `search.yml` into flat settings
pub fn parse_settings(raw: &str) -> Result<Settings, serde_yaml::Error> {
    let value: Value = serde_yaml::from_str(raw)?;
    let mut settings = Settings::new();
    if !value.is_null() {
        flatten(None, value, &mut settings);
    }
    Ok(settings)
}

/// Interpret an inline setting as a YAML scalar, falling back to a string
fn scalar(raw: &str) -> Value {
    serde_yaml::from_str::<Value>(raw)
        .ok()
        .filter(|v| !v.is_mapping() && !v.is_sequence())
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

/// Settings derived from the owner, without user overrides or generated keys
pub fn base_settings(owner: &SearchService, backend: Option<&BackendSettings>) -> Settings {
    let owner_name = owner.metadata.name.as_deref().unwrap_or_default();
    let namespace = owner.metadata.namespace.as_deref().unwrap_or("default");
    let svc = names::http_service(owner_name);

    let mut settings = Settings::from([
        (
            "external_url".to_string(),
            Value::String(format!("https://{svc}.{namespace}.svc:{HTTP_PORT}")),
        ),
        ("host".to_string(), Value::String("0.0.0.0".to_string())),
        ("port".to_string(), Value::Number(HTTP_PORT.into())),
        ("ssl.enabled".to_string(), Value::Bool(true)),
        (
            "ssl.certificate".to_string(),
            Value::String(format!("{HTTP_CERTS_MOUNT_PATH}/{CERT_FILENAME}")),
        ),
        (
            "ssl.key".to_string(),
            Value::String(format!("{HTTP_CERTS_MOUNT_PATH}/{KEY_FILENAME}")),
        ),
    ]);

    if let Some(backend) = backend {
        settings.insert(
            "backend.hosts".to_string(),
            Value::Sequence(vec![Value::String(backend.connection.url.clone())]),
        );
        settings.insert(
            "backend.username".to_string(),
            Value::String(backend.connection.auth_secret_key.clone()),
        );
        settings.insert(
            "backend.password".to_string(),
            Value::String(backend.password.clone()),
        );
        if backend.connection.ca_secret().is_some() {
            settings.insert(
                "backend.ssl.certificate_authorities".to_string(),
                Value::Sequence(vec![Value::String(format!(
                    "{BACKEND_CA_MOUNT_PATH}/{CERT_FILENAME}"
                ))]),
            );
        }
    }
    settings
}

/// Render the full bundle: derived settings, generated keys, inline config, then the config secret
pub fn render(
    owner: &SearchService,
    backend: Option<&BackendSettings>,
    previous: &Settings,
    user_config: Option<&Settings>,
) -> Result<String, ReconcileError> {
    let mut settings = base_settings(owner, backend);

    let session_key = previous
        .get(SESSION_KEY)
        .filter(|v| v.as_str().is_some_and(|s| !s.is_empty()))
        .cloned()
        .unwrap_or_else(|| Value::String(random_key()));
    settings.insert(SESSION_KEY.to_string(), session_key);
    let encryption_keys = previous
        .get(ENCRYPTION_KEYS)
        .filter(|v| v.as_sequence().is_some_and(|s| !s.is_empty()))
        .cloned()
        .unwrap_or_else(|| Value::Sequence(vec![Value::String(random_key())]));
    settings.insert(ENCRYPTION_KEYS.to_string(), encryption_keys);

    for (key, raw) in &owner.spec.config {
        settings.insert(key.clone(), scalar(raw));
    }
    if let Some(user_config) = user_config {
        settings.extend(user_config.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    serde_yaml::to_string(&settings)
        .map_err(|e| ReconcileError::Config(format!("failed to render {CONFIG_FILENAME}: {e}")))
}

/// Content hash used as the pod template label
pub fn hash(rendered: &str) -> String {
    format!("{:x}", md5::compute(rendered.as_bytes()))
}

/// Settings stored under `search.yml` in a user configuration secret
pub fn user_settings(secret: &Secret) -> Result<Settings, ReconcileError> {
    let Some(raw) = secret_value(secret.data.as_ref(), CONFIG_FILENAME) else {
        return Ok(Settings::new());
    };
    parse_settings(raw).map_err(|e| {
        ReconcileError::Config(format!(
            "secret {} key {CONFIG_FILENAME} is not valid YAML: {e}",
            ObjectKey::of(secret)
        ))
    })
}

pub async fn converge_config<S: Store>(
    store: &S,
    owner: &SearchService,
    backend: Option<&BackendSettings>,
    user_config: Option<&Settings>,
) -> Result<ConfigBundle, ReconcileError> {
    let owner_name = owner.metadata.name.as_deref().unwrap_or_default();
    let namespace = owner.metadata.namespace.as_deref().unwrap_or("default");
    let name = names::config_secret(owner_name);

    let existing: Option<Secret> = store.get(&ObjectKey::new(namespace, name.clone())).await?;
    // An unreadable previous bundle only loses its generated keys
    let previous = existing
        .as_ref()
        .and_then(|s| secret_value(s.data.as_ref(), CONFIG_FILENAME))
        .and_then(|raw| parse_settings(raw).ok())
        .unwrap_or_default();

    let rendered = render(owner, backend, &previous, user_config)?;
    let hash = hash(&rendered);
    let expected = Secret {
        metadata: dependent_meta(owner, name),
        data: Some(BTreeMap::from([(
            CONFIG_FILENAME.to_string(),
            ByteString(rendered.into_bytes()),
        )])),
        ..Secret::default()
    };
    let applied = converge_secret(store, expected).await?;
    Ok(ConfigBundle { applied, hash })
}
