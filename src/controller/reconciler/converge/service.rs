//! HTTP service in front of the search pods.

use super::{dependent_meta, merge_metadata, metadata_drifted, reconcile_resource, Applied};
use crate::constants::{HTTP_PORT, HTTP_PORT_NAME};
use crate::controller::reconciler::names;
use crate::controller::store::{Store, StoreError};
use crate::crd::SearchService;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

const DEFAULT_SERVICE_TYPE: &str = "ClusterIP";

pub fn expected_service(owner: &SearchService) -> Service {
    let owner_name = owner.metadata.name.as_deref().unwrap_or_default();
    let service_type = owner
        .spec
        .http
        .service
        .as_ref()
        .and_then(|s| s.type_.clone())
        .unwrap_or_else(|| DEFAULT_SERVICE_TYPE.to_string());

    Service {
        metadata: dependent_meta(owner, names::http_service(owner_name)),
        spec: Some(ServiceSpec {
            type_: Some(service_type),
            selector: Some(names::labels(owner_name)),
            ports: Some(vec![ServicePort {
                name: Some(HTTP_PORT_NAME.to_string()),
                port: HTTP_PORT,
                target_port: Some(IntOrString::Int(HTTP_PORT)),
                protocol: Some("TCP".to_string()),
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        status: None,
    }
}

/// Port fields the operator controls; node ports are platform-assigned
fn port_signature(port: &ServicePort) -> (Option<&str>, i32, Option<&IntOrString>, &str) {
    (
        port.name.as_deref(),
        port.port,
        port.target_port.as_ref(),
        port.protocol.as_deref().unwrap_or("TCP"),
    )
}

fn needs_update(expected: &Service, reconciled: &Service) -> bool {
    if metadata_drifted(&expected.metadata, &reconciled.metadata) {
        return true;
    }
    let (Some(want), Some(have)) = (&expected.spec, &reconciled.spec) else {
        return true;
    };
    let want_ports: Vec<_> = want.ports.iter().flatten().map(port_signature).collect();
    let have_ports: Vec<_> = have.ports.iter().flatten().map(port_signature).collect();
    want.type_.as_deref() != Some(have.type_.as_deref().unwrap_or(DEFAULT_SERVICE_TYPE))
        || want.selector != have.selector
        || want_ports != have_ports
}

fn update_reconciled(expected: &Service, reconciled: &mut Service) {
    merge_metadata(&expected.metadata, &mut reconciled.metadata);
    let want = expected.spec.clone().unwrap_or_default();
    let have = reconciled.spec.get_or_insert_with(ServiceSpec::default);
    let keep_node_ports = want.type_.as_deref() != Some(DEFAULT_SERVICE_TYPE);

    let ports = want
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|mut port| {
            if keep_node_ports {
                port.node_port = have
                    .ports
                    .iter()
                    .flatten()
                    .find(|p| p.name == port.name)
                    .and_then(|p| p.node_port);
            }
            port
        })
        .collect();

    have.ports = Some(ports);
    have.selector = want.selector;
    have.type_ = want.type_;
}

pub async fn converge_service<S: Store>(
    store: &S,
    owner: &SearchService,
) -> Result<Applied<Service>, StoreError> {
    reconcile_resource(store, expected_service(owner), needs_update, update_reconciled).await
}

/// Addresses the service is reachable on beyond its DNS names
pub fn external_addresses(service: &Service) -> Vec<String> {
    let external_ips = service
        .spec
        .as_ref()
        .and_then(|s| s.external_ips.clone())
        .unwrap_or_default();
    let ingress = service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .into_iter()
        .flatten()
        .flat_map(|i| i.ip.iter().chain(i.hostname.iter()).cloned());
    external_ips.into_iter().chain(ingress).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::SearchServiceSpec;
    use kube::api::ObjectMeta;

    fn owner() -> SearchService {
        SearchService {
            metadata: ObjectMeta {
                name: Some("sample".to_string()),
                namespace: Some("ns".to_string()),
                uid: Some("uid-1".to_string()),
                ..ObjectMeta::default()
            },
            spec: SearchServiceSpec {
                version: "7.7.0".to_string(),
                ..SearchServiceSpec::default()
            },
            status: None,
        }
    }

    #[test]
    fn test_expected_service() {
        let svc = expected_service(&owner());
        assert_eq!(svc.metadata.name.as_deref(), Some("sample-search-http"));
        let spec = svc.spec.expect("spec");
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        assert_eq!(spec.ports.expect("ports")[0].port, 3002);
        assert_eq!(svc.metadata.owner_references.map(|r| r.len()), Some(1));
    }

    #[test]
    fn test_platform_fields_are_not_drift() {
        let expected = expected_service(&owner());
        let mut reconciled = expected.clone();
        if let Some(spec) = reconciled.spec.as_mut() {
            spec.cluster_ip = Some("10.0.0.10".to_string());
        }
        assert!(!needs_update(&expected, &reconciled));
    }

    #[test]
    fn test_update_keeps_cluster_ip() {
        let expected = expected_service(&owner());
        let mut reconciled = expected.clone();
        if let Some(spec) = reconciled.spec.as_mut() {
            spec.cluster_ip = Some("10.0.0.10".to_string());
            spec.ports = Some(vec![]);
        }
        assert!(needs_update(&expected, &reconciled));
        update_reconciled(&expected, &mut reconciled);
        assert!(!needs_update(&expected, &reconciled));
        assert_eq!(
            reconciled.spec.and_then(|s| s.cluster_ip).as_deref(),
            Some("10.0.0.10")
        );
    }
}
