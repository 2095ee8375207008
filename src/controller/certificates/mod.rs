//! # Certificates
//!
//! Internal certificate authority and leaf certificates for the HTTP layer.
//!
//! Material is kept as PEM strings because that is how it is stored in secrets.
//! Every certificate carries a not-after; callers rotate it once `now` passes
//! `not_after - rotate_before` (the rotation deadline).

mod authority;
mod parse;

pub use authority::{CertificateAuthority, IssuedCertificate};
pub use parse::{key_matches, parse_certificate, ParsedCertificate};

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// Certificate errors
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("failed to generate certificate: {0}")]
    Generation(String),

    #[error("failed to parse certificate material: {0}")]
    Parse(String),

    #[error("invalid subject alternative name '{0}'")]
    InvalidSan(String),
}

pub type Result<T> = std::result::Result<T, CertificateError>;

/// Lifetime of issued certificates and how early they are rotated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationParams {
    pub validity: Duration,
    pub rotate_before: Duration,
}

impl RotationParams {
    /// Moment after which a certificate expiring at `not_after` must be replaced
    pub fn deadline(&self, not_after: DateTime<Utc>) -> DateTime<Utc> {
        let margin = chrono::Duration::from_std(self.rotate_before)
            .unwrap_or(chrono::Duration::MAX);
        not_after
            .checked_sub_signed(margin)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Whether a certificate expiring at `not_after` should be replaced at `now`
    pub fn should_rotate(&self, not_after: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now >= self.deadline(not_after)
    }
}

/// Rotation parameters for the CA and for leaf certificates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertRotation {
    pub ca: RotationParams,
    pub cert: RotationParams,
}

/// Normalize subject alternative names: IPs in canonical form, sorted, deduplicated
pub fn normalize_sans<I, S>(sans: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    sans.into_iter()
        .map(|san| {
            let san = san.as_ref().trim();
            san.parse::<IpAddr>()
                .map_or_else(|_| san.to_ascii_lowercase(), |ip| ip.to_string())
        })
        .filter(|san| !san.is_empty())
        .collect()
}

/// Check that a leaf is reusable: parseable, paired with its key, signed by
/// `ca`, not due for rotation and carrying exactly `expected_sans`.
///
/// Returns the leaf's not-after when it can be kept.
pub fn reusable_leaf(
    cert_pem: &str,
    key_pem: &str,
    ca: &CertificateAuthority,
    expected_sans: &BTreeSet<String>,
    params: &RotationParams,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let parsed = parse_certificate(cert_pem).ok()?;
    if !key_matches(key_pem, &parsed) {
        return None;
    }
    if !ca.signed(cert_pem) {
        return None;
    }
    if params.should_rotate(parsed.not_after, now) {
        return None;
    }
    if &parsed.sans != expected_sans {
        return None;
    }
    Some(parsed.not_after)
}
