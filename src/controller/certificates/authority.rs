use super::{key_matches, parse_certificate, CertificateError, Result, RotationParams};
use chrono::{DateTime, Utc};
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use std::collections::BTreeSet;
use std::net::IpAddr;
use x509_parser::prelude::{FromDer, X509Certificate};

const ORGANIZATION: &str = "search-operator";

/// Self-signed CA used to issue the HTTP leaf certificates
#[derive(Clone)]
pub struct CertificateAuthority {
    cert_pem: String,
    key_pem: String,
    not_after: DateTime<Utc>,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Leaf certificate signed by a [`CertificateAuthority`]
#[derive(Clone)]
pub struct IssuedCertificate {
    pub cert_pem: String,
    pub key_pem: String,
    pub not_after: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(ORGANIZATION.to_string()),
    );
    dn
}

/// Validity window starting one minute in the past to absorb clock skew
fn validity(params: &RotationParams) -> (time::OffsetDateTime, time::OffsetDateTime) {
    let now = time::OffsetDateTime::now_utc();
    let lifetime = time::Duration::seconds(i64::try_from(params.validity.as_secs()).unwrap_or(i64::MAX / 2));
    (now - time::Duration::minutes(1), now + lifetime)
}

fn san_entry(san: &str) -> Result<SanType> {
    if let Ok(ip) = san.parse::<IpAddr>() {
        return Ok(SanType::IpAddress(ip));
    }
    Ia5String::try_from(san.to_string())
        .map(SanType::DnsName)
        .map_err(|_| CertificateError::InvalidSan(san.to_string()))
}

impl CertificateAuthority {
    /// Generate a new self-signed CA
    pub fn generate(common_name: &str, params: &RotationParams) -> Result<Self> {
        let mut cert_params = CertificateParams::default();
        cert_params.distinguished_name = distinguished_name(common_name);
        cert_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        cert_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let (not_before, not_after) = validity(params);
        cert_params.not_before = not_before;
        cert_params.not_after = not_after;

        let key_pair = KeyPair::generate()
            .map_err(|e| CertificateError::Generation(format!("CA key: {e}")))?;
        let cert = cert_params
            .self_signed(&key_pair)
            .map_err(|e| CertificateError::Generation(format!("CA certificate: {e}")))?;

        Self::from_pem(&cert.pem(), &key_pair.serialize_pem())
    }

    /// Load a CA from stored PEM material
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        KeyPair::from_pem(key_pem)
            .map_err(|e| CertificateError::Parse(format!("CA key: {e}")))?;
        let parsed = parse_certificate(cert_pem)?;
        if !parsed.is_ca {
            return Err(CertificateError::Parse(
                "certificate is not a CA".to_string(),
            ));
        }
        if !key_matches(key_pem, &parsed) {
            return Err(CertificateError::Parse(
                "CA key does not match the certificate".to_string(),
            ));
        }
        Ok(Self {
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
            not_after: parsed.not_after,
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Issue a TLS server certificate for `sans`
    pub fn issue(
        &self,
        common_name: &str,
        sans: &BTreeSet<String>,
        params: &RotationParams,
    ) -> Result<IssuedCertificate> {
        let mut cert_params = CertificateParams::default();
        cert_params.distinguished_name = distinguished_name(common_name);
        cert_params.is_ca = IsCa::NoCa;
        cert_params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        cert_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let (not_before, not_after) = validity(params);
        cert_params.not_before = not_before;
        cert_params.not_after = not_after;
        cert_params.subject_alt_names = sans
            .iter()
            .map(|san| san_entry(san))
            .collect::<Result<Vec<_>>>()?;

        let leaf_key = KeyPair::generate()
            .map_err(|e| CertificateError::Generation(format!("leaf key: {e}")))?;
        let ca_key = KeyPair::from_pem(&self.key_pem)
            .map_err(|e| CertificateError::Parse(format!("CA key: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(&self.cert_pem, &ca_key)
            .map_err(|e| CertificateError::Parse(format!("CA certificate: {e}")))?;
        let cert = cert_params
            .signed_by(&leaf_key, &issuer)
            .map_err(|e| CertificateError::Generation(format!("leaf certificate: {e}")))?;

        let cert_pem = cert.pem();
        let not_after = parse_certificate(&cert_pem)?.not_after;
        Ok(IssuedCertificate {
            cert_pem,
            key_pem: leaf_key.serialize_pem(),
            not_after,
        })
    }

    /// Whether `cert_pem` carries a valid signature from this CA
    pub fn signed(&self, cert_pem: &str) -> bool {
        let (Ok(leaf_pem), Ok(ca_pem)) = (
            pem::parse(cert_pem.as_bytes()),
            pem::parse(self.cert_pem.as_bytes()),
        ) else {
            return false;
        };
        let (Ok((_, leaf)), Ok((_, ca))) = (
            X509Certificate::from_der(leaf_pem.contents()),
            X509Certificate::from_der(ca_pem.contents()),
        ) else {
            return false;
        };
        leaf.verify_signature(Some(ca.public_key())).is_ok()
    }
}
