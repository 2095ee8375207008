//! # Backend Association
//!
//! Resolves the connection details of the backend a SearchService references.
//!
//! The association controller publishes the resolved connection as JSON in the
//! `association.search.microscaler.io/backend-conf` annotation. Until it does,
//! the association is unresolved and the reconciler waits for the next event.

use crate::constants::BACKEND_ASSOCIATION_CONF_ANNOTATION;
use crate::crd::SearchService;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Resolved backend connection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConnection {
    pub url: String,
    /// Secret holding the credentials; the key is the username, its value the password
    pub auth_secret_name: String,
    pub auth_secret_key: String,
    #[serde(default)]
    pub ca_cert_provided: bool,
    /// Secret holding the backend CA as `tls.crt`
    #[serde(default)]
    pub ca_secret_name: Option<String>,
}

impl BackendConnection {
    fn is_complete(&self) -> bool {
        !self.url.is_empty() && !self.auth_secret_name.is_empty() && !self.auth_secret_key.is_empty()
    }

    /// Secret holding the backend CA, when one must be trusted
    pub fn ca_secret(&self) -> Option<&str> {
        self.ca_secret_name
            .as_deref()
            .filter(|name| self.ca_cert_provided && !name.is_empty())
    }
}

/// Outcome of resolving the backend of an owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Association {
    /// The spec references no backend
    NotConfigured,
    /// A backend is referenced but its connection is not known yet
    Unresolved,
    Resolved(BackendConnection),
}

/// Resolves backend connections; must not block
pub trait AssociationResolver: Send + Sync {
    fn resolve(&self, owner: &SearchService) -> Association;
}

/// Resolver reading the backend-conf annotation
#[derive(Debug, Default, Clone, Copy)]
pub struct AnnotationAssociationResolver;

impl AssociationResolver for AnnotationAssociationResolver {
    fn resolve(&self, owner: &SearchService) -> Association {
        if owner.spec.backend_ref.is_none() {
            return Association::NotConfigured;
        }
        let Some(raw) = owner
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(BACKEND_ASSOCIATION_CONF_ANNOTATION))
        else {
            return Association::Unresolved;
        };
        match serde_json::from_str::<BackendConnection>(raw) {
            Ok(conn) if conn.is_complete() => Association::Resolved(conn),
            Ok(_) => Association::Unresolved,
            Err(e) => {
                warn!("Ignoring malformed {BACKEND_ASSOCIATION_CONF_ANNOTATION} annotation: {e}");
                Association::Unresolved
            }
        }
    }
}
