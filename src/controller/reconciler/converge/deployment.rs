//! # Deployment
//!
//! The search pods. The pod template carries the configuration hash so any
//! change of the rendered bundle rolls the pods; the deployment carries a hash
//! of its desired spec so template drift is cheap to detect.

use super::config::BACKEND_CA_MOUNT_PATH;
use super::{dependent_meta, merge_metadata, metadata_drifted, reconcile_resource, Applied};
use crate::constants::{
    CONFIG_FILENAME, CONFIG_HASH_LABEL, CONFIG_MOUNT_PATH, CONTAINER_NAME, HTTP_CERTS_MOUNT_PATH,
    HTTP_PORT, HTTP_PORT_NAME, TEMPLATE_HASH_LABEL,
};
use crate::controller::reconciler::names;
use crate::controller::store::{Store, StoreError};
use crate::crd::SearchService;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

const CONFIG_VOLUME: &str = "config";
const HTTP_CERTS_VOLUME: &str = "http-certificates";
const BACKEND_CA_VOLUME: &str = "backend-certificates";

/// Inputs produced by earlier convergence steps
#[derive(Debug, Clone)]
pub struct DeploymentInputs<'a> {
    pub image: String,
    pub config_hash: &'a str,
    /// Backend CA secret to mount, when the association provides one
    pub backend_ca_secret: Option<&'a str>,
}

/// `<repository>:<version>` unless the spec overrides the image
pub fn image(owner: &SearchService, repository: &str) -> String {
    owner
        .spec
        .image
        .clone()
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| format!("{repository}:{}", owner.spec.version))
}

fn secret_volume(name: &str, secret_name: String) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name),
            ..SecretVolumeSource::default()
        }),
        ..Volume::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..VolumeMount::default()
    }
}

pub fn expected_deployment(owner: &SearchService, inputs: &DeploymentInputs<'_>) -> Deployment {
    let owner_name = owner.metadata.name.as_deref().unwrap_or_default();
    let labels = names::labels(owner_name);

    let mut pod_labels = labels.clone();
    pod_labels.insert(CONFIG_HASH_LABEL.to_string(), inputs.config_hash.to_string());

    let mut volumes = vec![
        secret_volume(CONFIG_VOLUME, names::config_secret(owner_name)),
        secret_volume(HTTP_CERTS_VOLUME, names::internal_certs_secret(owner_name)),
    ];
    let mut mounts = vec![
        mount(CONFIG_VOLUME, CONFIG_MOUNT_PATH),
        mount(HTTP_CERTS_VOLUME, HTTP_CERTS_MOUNT_PATH),
    ];
    if let Some(ca_secret) = inputs.backend_ca_secret {
        volumes.push(secret_volume(BACKEND_CA_VOLUME, ca_secret.to_string()));
        mounts.push(mount(BACKEND_CA_VOLUME, BACKEND_CA_MOUNT_PATH));
    }

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(inputs.image.clone()),
        ports: Some(vec![ContainerPort {
            name: Some(HTTP_PORT_NAME.to_string()),
            container_port: HTTP_PORT,
            protocol: Some("TCP".to_string()),
            ..ContainerPort::default()
        }]),
        env: Some(vec![EnvVar {
            name: "SEARCH_CONFIG".to_string(),
            value: Some(format!("{CONFIG_MOUNT_PATH}/{CONFIG_FILENAME}")),
            ..EnvVar::default()
        }]),
        volume_mounts: Some(mounts),
        ..Container::default()
    };

    let spec = DeploymentSpec {
        replicas: Some(owner.spec.replicas()),
        selector: LabelSelector {
            match_labels: Some(labels),
            ..LabelSelector::default()
        },
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(pod_labels),
                ..ObjectMeta::default()
            }),
            spec: Some(PodSpec {
                containers: vec![container],
                volumes: Some(volumes),
                ..PodSpec::default()
            }),
        },
        ..DeploymentSpec::default()
    };

    let mut metadata = dependent_meta(owner, names::deployment(owner_name));
    metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(TEMPLATE_HASH_LABEL.to_string(), template_hash(&spec));

    Deployment {
        metadata,
        spec: Some(spec),
        status: None,
    }
}

/// Hash of the desired spec; serialization of k8s types is field-ordered
pub fn template_hash(spec: &DeploymentSpec) -> String {
    let bytes = serde_json::to_vec(spec).unwrap_or_default();
    format!("{:x}", md5::compute(bytes))
}

fn container<'a>(spec: Option<&'a DeploymentSpec>) -> Option<&'a Container> {
    spec?
        .template
        .spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == CONTAINER_NAME)
}

fn pod_labels(spec: Option<&DeploymentSpec>) -> Option<&std::collections::BTreeMap<String, String>> {
    spec?.template.metadata.as_ref()?.labels.as_ref()
}

fn needs_update(expected: &Deployment, reconciled: &Deployment) -> bool {
    if metadata_drifted(&expected.metadata, &reconciled.metadata) {
        return true;
    }
    let (want, have) = (expected.spec.as_ref(), reconciled.spec.as_ref());
    if want.and_then(|s| s.replicas) != have.and_then(|s| s.replicas) {
        return true;
    }

    let have_labels = pod_labels(have);
    let labels_drifted = pod_labels(want).is_some_and(|labels| {
        labels
            .iter()
            .any(|(k, v)| have_labels.and_then(|l| l.get(k)) != Some(v))
    });
    if labels_drifted {
        return true;
    }

    match (container(want), container(have)) {
        (Some(w), Some(h)) => {
            w.image != h.image || w.ports != h.ports || w.env != h.env || w.volume_mounts != h.volume_mounts
        }
        _ => true,
    }
}

fn update_reconciled(expected: &Deployment, reconciled: &mut Deployment) {
    merge_metadata(&expected.metadata, &mut reconciled.metadata);
    let Some(want) = expected.spec.clone() else {
        return;
    };
    if reconciled.spec.is_none() {
        reconciled.spec = Some(want);
        return;
    }
    let Some(have) = reconciled.spec.as_mut() else {
        return;
    };

    have.replicas = want.replicas;
    let want_labels = want
        .template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();
    have.template
        .metadata
        .get_or_insert_with(ObjectMeta::default)
        .labels
        .get_or_insert_with(Default::default)
        .extend(want_labels);

    let Some(want_pod) = want.template.spec else {
        return;
    };
    let have_pod = have.template.spec.get_or_insert_with(PodSpec::default);
    have_pod.volumes = want_pod.volumes;
    for wanted in want_pod.containers {
        match have_pod.containers.iter_mut().find(|c| c.name == wanted.name) {
            Some(current) => {
                current.image = wanted.image;
                current.ports = wanted.ports;
                current.env = wanted.env;
                current.volume_mounts = wanted.volume_mounts;
            }
            None => have_pod.containers.push(wanted),
        }
    }
}

pub async fn converge_deployment<S: Store>(
    store: &S,
    owner: &SearchService,
    inputs: &DeploymentInputs<'_>,
) -> Result<Applied<Deployment>, StoreError> {
    reconcile_resource(
        store,
        expected_deployment(owner, inputs),
        needs_update,
        update_reconciled,
    )
    .await
}
