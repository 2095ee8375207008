//! # Custom Resource Definitions
//!
//! CRD types for the Search Operator.
//!
//! `SearchService` is the owner resource: every dependent the operator creates
//! (service, TLS secrets, configuration, deployment) is derived from its spec.

mod status;

pub use status::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// SearchService Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: search.microscaler.io/v1
/// kind: SearchService
/// metadata:
///   name: sample
///   namespace: default
/// spec:
///   version: 7.7.0
///   count: 3
///   backendRef:
///     name: backend
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "SearchService",
    group = "search.microscaler.io",
    version = "v1",
    namespaced,
    status = "SearchServiceStatus",
    shortname = "srch",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}, {"name":"Nodes", "type":"integer", "jsonPath":".status.availableNodes"}, {"name":"Version", "type":"string", "jsonPath":".status.version"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SearchServiceSpec {
    /// Version of the search service (semantic version, e.g. "7.7.0")
    #[serde(default)]
    pub version: String,
    /// Container image override. Defaults to `<imageRepository>:<version>`
    #[serde(default)]
    pub image: Option<String>,
    /// Number of replicas. Defaults to 1
    #[serde(default)]
    pub count: Option<i32>,
    /// Reference to the search backend this service connects to
    #[serde(default)]
    pub backend_ref: Option<BackendRef>,
    /// HTTP service and TLS settings
    #[serde(default)]
    pub http: HttpConfig,
    /// Inline configuration, flat dotted keys merged into `search.yml`
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    /// Secret holding additional `search.yml` settings
    #[serde(default)]
    pub config_ref: Option<SecretRef>,
    /// Peers that receive this service's CA certificate as a trust bundle
    #[serde(default)]
    pub remote_links: Vec<RemoteLink>,
}

/// Reference to the search backend cluster
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackendRef {
    /// Backend name
    pub name: String,
    /// Backend namespace (defaults to the SearchService namespace)
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Reference to a user-provided secret in the SearchService namespace
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub secret_name: String,
}

/// HTTP settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    #[serde(default)]
    pub service: Option<ServiceTemplate>,
    #[serde(default)]
    pub tls: TlsOptions,
}

/// Subset of the Service spec users may set
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTemplate {
    /// Service type: ClusterIP, NodePort or LoadBalancer
    #[serde(default, rename = "type")]
    pub type_: Option<String>,
}

/// TLS settings for the HTTP layer
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsOptions {
    /// Options for the operator-issued certificate
    #[serde(default)]
    pub self_signed_certificate: Option<SelfSignedCertificate>,
    /// User-provided certificate; replaces the operator-issued leaf when set
    #[serde(default)]
    pub certificate: Option<SecretRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SelfSignedCertificate {
    /// Extra subject alternative names for the issued certificate
    #[serde(default)]
    pub subject_alt_names: Vec<SubjectAlternativeName>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAlternativeName {
    #[serde(default)]
    pub dns: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

/// A peer that receives this service's CA as a trust bundle
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLink {
    pub name: String,
    pub namespace: String,
}

impl RemoteLink {
    /// Identifier stored in the managed-set annotation: `<namespace>/<name>`
    pub fn id(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Parse an identifier produced by [`RemoteLink::id`]
    pub fn from_id(id: &str) -> Option<Self> {
        let (namespace, name) = id.split_once('/')?;
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
        })
    }
}

impl SearchServiceSpec {
    /// Replica count with the default applied
    pub fn replicas(&self) -> i32 {
        self.count.unwrap_or(1)
    }

    /// Namespace of the referenced backend, defaulting to `owner_namespace`
    pub fn backend_namespace<'a>(&'a self, owner_namespace: &'a str) -> Option<&'a str> {
        self.backend_ref
            .as_ref()
            .map(|r| r.namespace.as_deref().unwrap_or(owner_namespace))
    }

    /// User-provided TLS certificate secret, if any
    pub fn custom_certificate_secret(&self) -> Option<&str> {
        self.http
            .tls
            .certificate
            .as_ref()
            .map(|s| s.secret_name.as_str())
            .filter(|s| !s.is_empty())
    }

    /// User-provided configuration secret, if any
    pub fn config_ref_secret(&self) -> Option<&str> {
        self.config_ref
            .as_ref()
            .map(|s| s.secret_name.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Extra SANs requested for the operator-issued certificate
    pub fn extra_subject_alt_names(&self) -> Vec<String> {
        self.http
            .tls
            .self_signed_certificate
            .as_ref()
            .map(|c| {
                c.subject_alt_names
                    .iter()
                    .flat_map(|san| san.dns.iter().chain(san.ip.iter()))
                    .filter(|v| !v.is_empty())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
