use super::{CertificateError, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

/// Fields of a certificate the operator cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCertificate {
    pub not_after: DateTime<Utc>,
    /// DNS names and IP addresses, normalized
    pub sans: BTreeSet<String>,
    pub is_ca: bool,
    /// Raw subject public key bits
    pub public_key: Vec<u8>,
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(|b| IpAddr::V4(Ipv4Addr::from(b))),
        16 => <[u8; 16]>::try_from(bytes).ok().map(|b| IpAddr::V6(Ipv6Addr::from(b))),
        _ => None,
    }
}

/// Parse the first certificate of a PEM document
pub fn parse_certificate(cert_pem: &str) -> Result<ParsedCertificate> {
    let block = pem::parse(cert_pem.as_bytes())
        .map_err(|e| CertificateError::Parse(format!("PEM: {e}")))?;
    let (_, cert) = X509Certificate::from_der(block.contents())
        .map_err(|e| CertificateError::Parse(format!("X.509: {e}")))?;

    let timestamp = cert.validity().not_after.timestamp();
    let not_after = DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| CertificateError::Parse(format!("not-after out of range: {timestamp}")))?;

    let mut sans = BTreeSet::new();
    if let Ok(Some(ext)) = cert.subject_alternative_name() {
        for name in &ext.value.general_names {
            match name {
                GeneralName::DNSName(dns) => {
                    sans.insert(dns.to_ascii_lowercase());
                }
                GeneralName::IPAddress(bytes) => {
                    if let Some(ip) = ip_from_bytes(bytes) {
                        sans.insert(ip.to_string());
                    }
                }
                _ => {}
            }
        }
    }

    Ok(ParsedCertificate {
        not_after,
        sans,
        is_ca: cert.is_ca(),
        public_key: cert.public_key().subject_public_key.data.to_vec(),
    })
}

/// Whether `key_pem` is the private key of the certificate `parsed` came from
pub fn key_matches(key_pem: &str, parsed: &ParsedCertificate) -> bool {
    rcgen::KeyPair::from_pem(key_pem).is_ok_and(|key| key.public_key_raw() == parsed.public_key.as_slice())
}
