//! # Dependent Names
//!
//! Deterministic names and labels of the objects derived from a SearchService.

use crate::constants::{NAME_LABEL, NAME_SEGMENT, TYPE_LABEL, TYPE_LABEL_VALUE};
use std::collections::BTreeMap;

/// `<owner>-search`, also the deployment name
pub fn base(owner: &str) -> String {
    format!("{owner}-{NAME_SEGMENT}")
}

pub fn deployment(owner: &str) -> String {
    base(owner)
}

pub fn http_service(owner: &str) -> String {
    format!("{}-http", base(owner))
}

pub fn ca_secret(owner: &str) -> String {
    format!("{}-http-ca-internal", base(owner))
}

pub fn internal_certs_secret(owner: &str) -> String {
    format!("{}-http-certs-internal", base(owner))
}

pub fn public_certs_secret(owner: &str) -> String {
    format!("{}-http-certs-public", base(owner))
}

pub fn config_secret(owner: &str) -> String {
    format!("{}-config", base(owner))
}

/// Trust bundle written into a remote peer's namespace.
///
/// Carries the owner namespace: owners with the same name in different
/// namespaces may link the same peer.
pub fn remote_ca_secret(owner_namespace: &str, owner: &str, peer: &str) -> String {
    format!("{owner_namespace}-{owner}-{peer}-{NAME_SEGMENT}-remote-ca")
}

/// Watch tag for the user configuration secret
pub fn config_ref_watch_tag(owner: &str) -> String {
    format!("{}-config-ref", base(owner))
}

/// Watch tag for the user-provided HTTP certificate secret
pub fn http_certificate_watch_tag(owner: &str) -> String {
    format!("{}-http-certificate", base(owner))
}

/// Labels set on every dependent and used as the pod selector
pub fn labels(owner: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME_LABEL.to_string(), owner.to_string()),
        (TYPE_LABEL.to_string(), TYPE_LABEL_VALUE.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(deployment("sample"), "sample-search");
        assert_eq!(http_service("sample"), "sample-search-http");
        assert_eq!(ca_secret("sample"), "sample-search-http-ca-internal");
        assert_eq!(internal_certs_secret("sample"), "sample-search-http-certs-internal");
        assert_eq!(public_certs_secret("sample"), "sample-search-http-certs-public");
        assert_eq!(config_secret("sample"), "sample-search-config");
        assert_eq!(
            remote_ca_secret("ns", "sample", "peer"),
            "ns-sample-peer-search-remote-ca"
        );
        assert_ne!(
            remote_ca_secret("ns1", "sample", "peer"),
            remote_ca_secret("ns2", "sample", "peer")
        );
        assert_eq!(config_ref_watch_tag("sample"), "sample-search-config-ref");
        assert_eq!(http_certificate_watch_tag("sample"), "sample-search-http-certificate");
    }
}
