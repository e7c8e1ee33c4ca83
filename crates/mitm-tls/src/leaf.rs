use std::net::IpAddr;
use std::time::SystemTime;

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::sign::CertifiedKey;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{CodecError, RootCertificateAuthority};

const LEAF_NOT_BEFORE_SKEW: time::Duration = time::Duration::minutes(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeafConfig {
    pub validity_days: u32,
    pub cache_capacity: usize,
    pub alpn_protocols: Vec<String>,
}

impl Default for LeafConfig {
    fn default() -> Self {
        Self {
            validity_days: 30,
            cache_capacity: 1024,
            alpn_protocols: vec!["h2".to_string(), "http/1.1".to_string()],
        }
    }
}

impl LeafConfig {
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.validity_days == 0 {
            return Err(CodecError::InvalidConfiguration(
                "leaf validity_days must be greater than zero".to_string(),
            ));
        }
        if self.alpn_protocols.iter().any(|protocol| protocol.is_empty()) {
            return Err(CodecError::InvalidConfiguration(
                "leaf alpn_protocols must not contain empty entries".to_string(),
            ));
        }
        Ok(())
    }

    pub fn alpn_wire_protocols(&self) -> Vec<Vec<u8>> {
        self.alpn_protocols
            .iter()
            .map(|protocol| protocol.as_bytes().to_vec())
            .collect()
    }
}

/// A host certificate signed by the bound root, with the chain presented to
/// the client (`[leaf, root]`).
#[derive(Debug)]
pub struct LeafCertificate {
    pub host: String,
    pub root_fingerprint: String,
    chain: Vec<CertificateDer<'static>>,
    key_der: PrivatePkcs8KeyDer<'static>,
}

impl LeafCertificate {
    pub fn leaf_der(&self) -> &CertificateDer<'static> {
        &self.chain[0]
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    pub fn certified_key(&self) -> Result<CertifiedKey, CodecError> {
        let key = PrivateKeyDer::from(self.key_der.clone_key());
        let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)?;
        Ok(CertifiedKey::new(self.chain.clone(), signing_key))
    }
}

// pki-types keys only clone through `clone_key`
impl Clone for LeafCertificate {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            root_fingerprint: self.root_fingerprint.clone(),
            chain: self.chain.clone(),
            key_der: self.key_der.clone_key(),
        }
    }
}

pub fn issue_leaf(
    authority: &RootCertificateAuthority,
    host: &str,
    config: &LeafConfig,
) -> Result<LeafCertificate, CodecError> {
    let host = normalize_host(host)?;
    let mut leaf_params = build_leaf_params(&host)?;
    let (not_before, not_after) = leaf_validity(authority, config);
    leaf_params.not_before = not_before;
    leaf_params.not_after = not_after;

    let leaf_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;
    let key_der = PrivatePkcs8KeyDer::from(leaf_key.serialize_der());
    let leaf_cert = leaf_params.signed_by(&leaf_key, authority.issuer())?;

    Ok(LeafCertificate {
        host,
        chain: vec![leaf_cert.der().clone(), authority.certificate_der().clone()],
        key_der,
        root_fingerprint: authority.fingerprint().to_string(),
    })
}

/// Lowercases DNS names and renders IP literals in canonical form.
pub fn normalize_host(host: &str) -> Result<String, CodecError> {
    let trimmed = host.trim().trim_end_matches('.');
    let unbracketed = trimmed
        .strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(trimmed);
    if unbracketed.is_empty() {
        return Err(CodecError::InvalidHost("host must not be empty".to_string()));
    }
    match unbracketed.parse::<IpAddr>() {
        Ok(ip) => Ok(ip.to_string()),
        Err(_) => Ok(unbracketed.to_ascii_lowercase()),
    }
}

fn leaf_validity(
    authority: &RootCertificateAuthority,
    config: &LeafConfig,
) -> (OffsetDateTime, OffsetDateTime) {
    let now = OffsetDateTime::now_utc();
    let not_before = now - LEAF_NOT_BEFORE_SKEW;
    let mut not_after = now + time::Duration::days(i64::from(config.validity_days));

    // never outlive the root, unless the root is already past its window
    if let Some(root_not_after) = authority.not_after().map(system_time_to_offset) {
        if root_not_after > not_before && root_not_after < not_after {
            not_after = root_not_after;
        }
    }
    (not_before, not_after)
}

fn system_time_to_offset(value: SystemTime) -> OffsetDateTime {
    OffsetDateTime::from(value)
}

fn build_leaf_params(host: &str) -> Result<CertificateParams, CodecError> {
    let mut params = CertificateParams::new(Vec::<String>::new())?;
    params.use_authority_key_identifier_extension = true;
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, host.to_string());
    params.distinguished_name = distinguished_name;

    if let Ok(ip) = host.parse::<IpAddr>() {
        params.subject_alt_names.push(SanType::IpAddress(ip));
    } else {
        params
            .subject_alt_names
            .push(SanType::DnsName(host.try_into()?));
    }

    Ok(params)
}
