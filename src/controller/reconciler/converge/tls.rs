//! # TLS Secrets
//!
//! Internal CA, internal leaf and public leaf secrets for the HTTP layer.
//!
//! The CA is reused until it enters its rotation margin. The internal leaf is
//! reissued when it is missing, unparsable, signed by another CA, due for
//! rotation or carries different SANs. The public secret projects the internal
//! one without its private key.

use super::{dependent_meta, merge_metadata, metadata_drifted, reconcile_resource, Applied};
use crate::constants::{CA_FILENAME, CERT_FILENAME, KEY_FILENAME};
use crate::controller::certificates::{
    normalize_sans, reusable_leaf, CertificateAuthority, RotationParams,
};
use crate::controller::reconciler::names;
use crate::controller::reconciler::types::ReconcileError;
use crate::controller::store::{ObjectKey, Store};
use crate::crd::SearchService;
use crate::observability;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

pub type SecretData = BTreeMap<String, ByteString>;

/// String value of a secret key
pub fn secret_value<'a>(data: Option<&'a SecretData>, key: &str) -> Option<&'a str> {
    data?
        .get(key)
        .and_then(|v| std::str::from_utf8(&v.0).ok())
        .filter(|v| !v.is_empty())
}

fn bytes(value: &str) -> ByteString {
    ByteString(value.as_bytes().to_vec())
}

fn secret(owner: &SearchService, name: String, data: SecretData) -> Secret {
    Secret {
        metadata: dependent_meta(owner, name),
        data: Some(data),
        ..Secret::default()
    }
}

fn secret_needs_update(expected: &Secret, reconciled: &Secret) -> bool {
    metadata_drifted(&expected.metadata, &reconciled.metadata) || expected.data != reconciled.data
}

fn secret_update_reconciled(expected: &Secret, reconciled: &mut Secret) {
    merge_metadata(&expected.metadata, &mut reconciled.metadata);
    reconciled.data.clone_from(&expected.data);
    reconciled.string_data = None;
}

/// Create or update a secret so it holds exactly `expected.data`
pub async fn converge_secret<S: Store>(
    store: &S,
    expected: Secret,
) -> Result<Applied<Secret>, ReconcileError> {
    Ok(reconcile_resource(store, expected, secret_needs_update, secret_update_reconciled).await?)
}

/// SANs of the internal certificate: service DNS names, user SANs and external addresses
pub fn internal_sans(owner: &SearchService, external_addresses: &[String]) -> BTreeSet<String> {
    let owner_name = owner.metadata.name.as_deref().unwrap_or_default();
    let namespace = owner.metadata.namespace.as_deref().unwrap_or("default");
    let svc = names::http_service(owner_name);
    let mut sans = vec![
        svc.clone(),
        format!("{svc}.{namespace}"),
        format!("{svc}.{namespace}.svc"),
    ];
    sans.extend(owner.spec.extra_subject_alt_names());
    sans.extend(external_addresses.iter().cloned());
    normalize_sans(sans)
}

/// Load the CA from its secret or generate a new one, and persist it
pub async fn ensure_ca<S: Store>(
    store: &S,
    owner: &SearchService,
    params: &RotationParams,
    now: DateTime<Utc>,
) -> Result<(CertificateAuthority, Applied<Secret>), ReconcileError> {
    let owner_name = owner.metadata.name.as_deref().unwrap_or_default();
    let namespace = owner.metadata.namespace.as_deref().unwrap_or("default");
    let name = names::ca_secret(owner_name);

    let existing: Option<Secret> = store.get(&ObjectKey::new(namespace, name.clone())).await?;
    let data = existing.as_ref().and_then(|s| s.data.as_ref());
    let reusable = match (secret_value(data, CERT_FILENAME), secret_value(data, KEY_FILENAME)) {
        (Some(cert), Some(key)) => CertificateAuthority::from_pem(cert, key)
            .ok()
            .filter(|ca| !params.should_rotate(ca.not_after(), now)),
        _ => None,
    };

    let ca = match reusable {
        Some(ca) => ca,
        None => {
            info!(secret = %name, "Generating internal CA");
            observability::metrics::increment_certificates_issued("ca");
            CertificateAuthority::generate(&format!("{owner_name}-http"), params)?
        }
    };

    let expected = secret(
        owner,
        name,
        BTreeMap::from([
            (CERT_FILENAME.to_string(), bytes(ca.cert_pem())),
            (KEY_FILENAME.to_string(), bytes(ca.key_pem())),
        ]),
    );
    let applied = converge_secret(store, expected).await?;
    Ok((ca, applied))
}

/// Converge the internal certificate secret.
///
/// With `user_certificate` set, its material is used verbatim and no rotation
/// deadline is returned.
pub async fn ensure_internal_certs<S: Store>(
    store: &S,
    owner: &SearchService,
    ca: &CertificateAuthority,
    sans: &BTreeSet<String>,
    user_certificate: Option<&Secret>,
    params: &RotationParams,
    now: DateTime<Utc>,
) -> Result<(Applied<Secret>, Option<DateTime<Utc>>), ReconcileError> {
    let owner_name = owner.metadata.name.as_deref().unwrap_or_default();
    let namespace = owner.metadata.namespace.as_deref().unwrap_or("default");
    let name = names::internal_certs_secret(owner_name);

    if let Some(user) = user_certificate {
        let user_key = ObjectKey::of(user);
        let data = user.data.as_ref();
        let (Some(cert), Some(key)) = (secret_value(data, CERT_FILENAME), secret_value(data, KEY_FILENAME)) else {
            return Err(ReconcileError::Config(format!(
                "certificate secret {user_key} must contain {CERT_FILENAME} and {KEY_FILENAME}"
            )));
        };
        let mut expected_data = BTreeMap::from([
            (CERT_FILENAME.to_string(), bytes(cert)),
            (KEY_FILENAME.to_string(), bytes(key)),
        ]);
        if let Some(user_ca) = secret_value(data, CA_FILENAME) {
            expected_data.insert(CA_FILENAME.to_string(), bytes(user_ca));
        }
        let applied = converge_secret(store, secret(owner, name, expected_data)).await?;
        return Ok((applied, None));
    }

    let existing: Option<Secret> = store.get(&ObjectKey::new(namespace, name.clone())).await?;
    let data = existing.as_ref().and_then(|s| s.data.as_ref());
    let kept = match (secret_value(data, CERT_FILENAME), secret_value(data, KEY_FILENAME)) {
        (Some(cert), Some(key)) => reusable_leaf(cert, key, ca, sans, params, now)
            .map(|not_after| (cert.to_string(), key.to_string(), not_after)),
        _ => None,
    };

    let (cert_pem, key_pem, not_after) = match kept {
        Some(kept) => kept,
        None => {
            info!(secret = %name, "Issuing internal HTTP certificate");
            observability::metrics::increment_certificates_issued("http");
            let issued = ca.issue(&names::http_service(owner_name), sans, params)?;
            (issued.cert_pem, issued.key_pem, issued.not_after)
        }
    };

    let expected = secret(
        owner,
        name,
        BTreeMap::from([
            (CERT_FILENAME.to_string(), bytes(&cert_pem)),
            (KEY_FILENAME.to_string(), bytes(&key_pem)),
            (CA_FILENAME.to_string(), bytes(ca.cert_pem())),
        ]),
    );
    let applied = converge_secret(store, expected).await?;
    Ok((applied, Some(params.deadline(not_after))))
}

/// Converge the public secret from the internal one: certificate and CA, no key
pub async fn ensure_public_certs<S: Store>(
    store: &S,
    owner: &SearchService,
    internal: &Secret,
) -> Result<Applied<Secret>, ReconcileError> {
    let owner_name = owner.metadata.name.as_deref().unwrap_or_default();
    let data: SecretData = internal
        .data
        .iter()
        .flatten()
        .filter(|(k, _)| k.as_str() == CERT_FILENAME || k.as_str() == CA_FILENAME)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    converge_secret(store, secret(owner, names::public_certs_secret(owner_name), data)).await
}
