//! # Validation
//!
//! Validates SearchService specs and Kubernetes duration strings.
//!
//! Spec validation returns the spec with defaults applied, or the first
//! [`ValidationError`] found. Errors render in the platform's field-error
//! format: `spec.version: Invalid value: "": version is required`.

use crate::constants::{MIN_SUPPORTED_VERSION, NAME_SEGMENT};
use crate::crd::{SearchService, SearchServiceSpec};
use anyhow::Result;
use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

static VERSION_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(?P<major>\d+)\.(?P<minor>\d+)\.(?P<patch>\d+)(-[0-9A-Za-z.-]+)?$").ok()
});

static DNS_LABEL_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").ok());

static DNS_SUBDOMAIN_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").ok()
});

/// Wildcard hostnames are allowed in certificate SANs
static SAN_DNS_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(\*\.)?[a-zA-Z0-9]([-a-zA-Z0-9]*[a-zA-Z0-9])?(\.[a-zA-Z0-9]([-a-zA-Z0-9]*[a-zA-Z0-9])?)*$").ok()
});

const SERVICE_TYPES: [&str; 3] = ["ClusterIP", "NodePort", "LoadBalancer"];

/// Longest dependent suffix is `-search-http`, and service names are DNS labels
const MAX_NAME_LENGTH: usize = 63 - "-http".len() - NAME_SEGMENT.len() - 1;

/// Field-level validation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: Invalid value: \"{value}\": {message}")]
pub struct ValidationError {
    pub field: String,
    pub value: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, value: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            message: message.into(),
        }
    }
}

/// Validates and defaults a SearchService spec
pub trait SpecValidator: Send + Sync {
    fn validate(&self, resource: &SearchService) -> std::result::Result<SearchServiceSpec, ValidationError>;
}

/// Built-in checks: version, replicas, names, service type, SANs and references
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSpecValidator;

impl SpecValidator for DefaultSpecValidator {
    fn validate(&self, resource: &SearchService) -> std::result::Result<SearchServiceSpec, ValidationError> {
        let name = resource.metadata.name.as_deref().unwrap_or_default();
        if name.len() > MAX_NAME_LENGTH {
            return Err(ValidationError::new(
                "metadata.name",
                name,
                format!("name length must be no more than {MAX_NAME_LENGTH} characters"),
            ));
        }

        let mut spec = resource.spec.clone();
        validate_version(&spec.version)?;

        let count = spec.replicas();
        if count < 0 {
            return Err(ValidationError::new(
                "spec.count",
                count.to_string(),
                "count must be greater than or equal to 0",
            ));
        }
        spec.count = Some(count);

        if let Some(backend) = &spec.backend_ref {
            if backend.name.trim().is_empty() {
                return Err(ValidationError::new("spec.backendRef.name", "", "name is required"));
            }
            if let Some(ns) = &backend.namespace {
                check_label(ns, "spec.backendRef.namespace")?;
            }
        }

        if let Some(service_type) = spec.http.service.as_ref().and_then(|s| s.type_.as_deref()) {
            if !SERVICE_TYPES.contains(&service_type) {
                return Err(ValidationError::new(
                    "spec.http.service.type",
                    service_type,
                    format!("supported values: {}", SERVICE_TYPES.join(", ")),
                ));
            }
        }

        if let Some(self_signed) = &spec.http.tls.self_signed_certificate {
            for (i, san) in self_signed.subject_alt_names.iter().enumerate() {
                validate_san(san.dns.as_deref(), san.ip.as_deref(), i)?;
            }
        }

        if let Some(secret) = &spec.http.tls.certificate {
            check_subdomain(&secret.secret_name, "spec.http.tls.certificate.secretName")?;
        }
        if let Some(secret) = &spec.config_ref {
            check_subdomain(&secret.secret_name, "spec.configRef.secretName")?;
        }

        for (i, link) in spec.remote_links.iter().enumerate() {
            check_label(&link.name, &format!("spec.remoteLinks[{i}].name"))?;
            check_label(&link.namespace, &format!("spec.remoteLinks[{i}].namespace"))?;
        }
        spec.remote_links.sort();
        spec.remote_links.dedup();

        Ok(spec)
    }
}

/// Parse `major.minor.patch` from a version string
pub fn parse_version(version: &str) -> Option<(u64, u64, u64)> {
    let captures = VERSION_REGEX.as_ref()?.captures(version.trim())?;
    let part = |name: &str| captures.name(name)?.as_str().parse::<u64>().ok();
    Some((part("major")?, part("minor")?, part("patch")?))
}

fn validate_version(version: &str) -> std::result::Result<(), ValidationError> {
    if version.trim().is_empty() {
        return Err(ValidationError::new("spec.version", "", "version is required"));
    }
    let parsed = parse_version(version).ok_or_else(|| {
        ValidationError::new("spec.version", version, "must be a semantic version (e.g. 7.7.0)")
    })?;
    if parsed < MIN_SUPPORTED_VERSION {
        let (major, minor, patch) = MIN_SUPPORTED_VERSION;
        return Err(ValidationError::new(
            "spec.version",
            version,
            format!("unsupported version: minimum is {major}.{minor}.{patch}"),
        ));
    }
    Ok(())
}

fn validate_san(dns: Option<&str>, ip: Option<&str>, index: usize) -> std::result::Result<(), ValidationError> {
    let field = format!("spec.http.tls.selfSignedCertificate.subjectAltNames[{index}]");
    match (dns.filter(|d| !d.is_empty()), ip.filter(|i| !i.is_empty())) {
        (None, None) => Err(ValidationError::new(field, "", "one of dns or ip is required")),
        (Some(dns), _) if !matches(&SAN_DNS_REGEX, dns) => {
            Err(ValidationError::new(format!("{field}.dns"), dns, "must be a valid DNS name"))
        }
        (_, Some(ip)) if ip.parse::<IpAddr>().is_err() => {
            Err(ValidationError::new(format!("{field}.ip"), ip, "must be a valid IP address"))
        }
        _ => Ok(()),
    }
}

fn matches(regex: &LazyLock<Option<Regex>>, value: &str) -> bool {
    regex.as_ref().is_some_and(|r| r.is_match(value))
}

fn check_label(value: &str, field: &str) -> std::result::Result<(), ValidationError> {
    if value.len() > 63 || !matches(&DNS_LABEL_REGEX, value) {
        return Err(ValidationError::new(
            field,
            value,
            "must be a valid DNS label (lowercase alphanumeric and hyphens, at most 63 characters)",
        ));
    }
    Ok(())
}

fn check_subdomain(value: &str, field: &str) -> std::result::Result<(), ValidationError> {
    if value.len() > 253 || !matches(&DNS_SUBDOMAIN_REGEX, value) {
        return Err(ValidationError::new(
            field,
            value,
            "must be a valid Kubernetes name (lowercase alphanumeric, hyphens, dots)",
        ));
    }
    Ok(())
}

/// Parse Kubernetes duration string into std::time::Duration
/// Supports formats: "30s", "1m", "5m", "1h", "24h", "365d"
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Duration> {
    let duration_trimmed = duration_str.trim();

    if duration_trimmed.is_empty() {
        return Err(anyhow::anyhow!("Duration string cannot be empty"));
    }

    let duration_regex = Regex::new(r"^(?P<number>\d+)(?P<unit>[smhd])$")
        .map_err(|e| anyhow::anyhow!("Failed to compile regex: {e}"))?;

    let interval_lower = duration_trimmed.to_lowercase();
    let captures = duration_regex
        .captures(&interval_lower)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Invalid duration format '{duration_trimmed}'. Expected format: <number><unit> (e.g., '30s', '24h', '365d')"
            )
        })?;

    let number: u64 = captures
        .name("number")
        .map(|m| m.as_str())
        .unwrap_or_default()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid duration number in '{duration_trimmed}': {e}"))?;

    if number == 0 {
        return Err(anyhow::anyhow!(
            "Duration number must be greater than 0, got '{duration_trimmed}'"
        ));
    }

    let multiplier = match captures.name("unit").map(|m| m.as_str()) {
        Some("s") => 1,
        Some("m") => 60,
        Some("h") => 3600,
        Some("d") => 86400,
        unit => {
            return Err(anyhow::anyhow!(
                "Invalid unit '{}' in duration '{duration_trimmed}'. Expected: s, m, h, or d",
                unit.unwrap_or_default()
            ));
        }
    };

    let seconds = number
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("Duration '{duration_trimmed}' is too large"))?;
    Ok(Duration::from_secs(seconds))
}
