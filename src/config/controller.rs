//! # Controller Configuration
//!
//! Reconciler settings: watched namespace, image repository, certificate
//! lifetimes and the event buffer size.

use super::env_var_or_default;
use crate::constants::*;
use crate::controller::certificates::{CertRotation, RotationParams};
use crate::controller::reconciler::validation::parse_kubernetes_duration;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch; all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Repository used when a spec carries no image override
    pub image_repository: String,
    /// CA and leaf certificate lifetimes
    pub cert_rotation: CertRotation,
    /// Events buffered before the oldest are dropped
    pub event_buffer_size: usize,
    /// Version stamped on every reconciled resource
    pub controller_version: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            image_repository: DEFAULT_IMAGE_REPOSITORY.to_string(),
            cert_rotation: default_cert_rotation(),
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
            controller_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn duration_or(value: &str, fallback: Duration) -> Duration {
    parse_kubernetes_duration(value).unwrap_or(fallback)
}

fn default_cert_rotation() -> CertRotation {
    let day = Duration::from_secs(86400);
    CertRotation {
        ca: RotationParams {
            validity: duration_or(DEFAULT_CA_CERT_VALIDITY, day * 365),
            rotate_before: duration_or(DEFAULT_CA_CERT_ROTATE_BEFORE, day),
        },
        cert: RotationParams {
            validity: duration_or(DEFAULT_CERT_VALIDITY, day * 365),
            rotate_before: duration_or(DEFAULT_CERT_ROTATE_BEFORE, day),
        },
    }
}

/// Read a duration variable, keeping `default` when unset or malformed
fn env_duration(key: &str, default: Duration) -> Duration {
    match std::env::var(key) {
        Ok(value) => match parse_kubernetes_duration(&value) {
            Ok(duration) => duration,
            Err(e) => {
                warn!("Ignoring {key}={value}: {e}");
                default
            }
        },
        Err(_) => default,
    }
}

/// Rotation must leave part of the validity window usable
fn rotation_params(
    validity_key: &str,
    rotate_key: &str,
    default: RotationParams,
) -> RotationParams {
    let params = RotationParams {
        validity: env_duration(validity_key, default.validity),
        rotate_before: env_duration(rotate_key, default.rotate_before),
    };
    if params.rotate_before >= params.validity {
        warn!(
            "{rotate_key} ({:?}) must be shorter than {validity_key} ({:?}), using defaults",
            params.rotate_before, params.validity
        );
        return default;
    }
    params
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            watch_namespace: std::env::var("WATCH_NAMESPACE")
                .ok()
                .filter(|ns| !ns.trim().is_empty()),
            image_repository: env_var_or_default("IMAGE_REPOSITORY", defaults.image_repository),
            cert_rotation: CertRotation {
                ca: rotation_params(
                    "CA_CERT_VALIDITY",
                    "CA_CERT_ROTATE_BEFORE",
                    defaults.cert_rotation.ca,
                ),
                cert: rotation_params(
                    "CERT_VALIDITY",
                    "CERT_ROTATE_BEFORE",
                    defaults.cert_rotation.cert,
                ),
            },
            event_buffer_size: env_var_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)
                .max(1),
            controller_version: env_var_or_default(
                "CONTROLLER_VERSION",
                defaults.controller_version,
            ),
        }
    }
}
