use std::fmt;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SignatureAlgorithm,
};
use rustls::pki_types::CertificateDer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;
use x509_parser::parse_x509_certificate;

use crate::pem::{certificate_to_pem, private_key_to_pem, write_pem_file};
use crate::CodecError;

const NOT_BEFORE_SKEW: time::Duration = time::Duration::minutes(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootKeyAlgorithm {
    EcdsaP256,
    EcdsaP384,
    Ed25519,
}

impl Default for RootKeyAlgorithm {
    fn default() -> Self {
        Self::EcdsaP256
    }
}

impl RootKeyAlgorithm {
    fn signature_algorithm(self) -> &'static SignatureAlgorithm {
        match self {
            Self::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            Self::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            Self::Ed25519 => &rcgen::PKCS_ED25519,
        }
    }
}

/// Parameters for freshly generated roots.
///
/// `not_before_unix` / `not_after_unix` pin the validity window explicitly;
/// when unset the window starts now and lasts `validity_days`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RootCaConfig {
    pub common_name: String,
    pub organization: String,
    pub organizational_unit: Option<String>,
    pub validity_days: u32,
    pub key_algorithm: RootKeyAlgorithm,
    pub not_before_unix: Option<i64>,
    pub not_after_unix: Option<i64>,
}

impl Default for RootCaConfig {
    fn default() -> Self {
        Self {
            common_name: "mitm-ca Root CA".to_string(),
            organization: "mitm-ca".to_string(),
            organizational_unit: Some("Interception".to_string()),
            validity_days: 365,
            key_algorithm: RootKeyAlgorithm::EcdsaP256,
            not_before_unix: None,
            not_after_unix: None,
        }
    }
}

impl RootCaConfig {
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.common_name.trim().is_empty() {
            return Err(CodecError::InvalidConfiguration(
                "common_name must not be empty".to_string(),
            ));
        }
        if self.organization.trim().is_empty() {
            return Err(CodecError::InvalidConfiguration(
                "organization must not be empty".to_string(),
            ));
        }
        if self.validity_days == 0 {
            return Err(CodecError::InvalidConfiguration(
                "validity_days must be greater than zero".to_string(),
            ));
        }
        if let (Some(not_before), Some(not_after)) = (self.not_before_unix, self.not_after_unix) {
            if not_before >= not_after {
                return Err(CodecError::InvalidConfiguration(
                    "not_before_unix must be earlier than not_after_unix".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn validity_window(&self) -> Result<(OffsetDateTime, OffsetDateTime), CodecError> {
        let now = OffsetDateTime::now_utc();
        let not_before = match self.not_before_unix {
            Some(seconds) => unix_to_offset(seconds)?,
            None => now - NOT_BEFORE_SKEW,
        };
        let not_after = match self.not_after_unix {
            Some(seconds) => unix_to_offset(seconds)?,
            None => now + time::Duration::days(i64::from(self.validity_days)),
        };
        Ok((not_before, not_after))
    }
}

/// A root CA: signing key, self-signed certificate and, when it was generated
/// here, the configuration it came from.
pub struct RootCertificateAuthority {
    issuer: Issuer<'static, KeyPair>,
    cert_der: CertificateDer<'static>,
    cert_pem: String,
    key_der: Vec<u8>,
    not_after: Option<SystemTime>,
    fingerprint: String,
    config: Option<RootCaConfig>,
}

impl fmt::Debug for RootCertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootCertificateAuthority")
            .field("fingerprint", &self.fingerprint)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

pub fn generate_root(config: &RootCaConfig) -> Result<RootCertificateAuthority, CodecError> {
    config.validate()?;
    let ca_key = KeyPair::generate_for(config.key_algorithm.signature_algorithm())?;
    let key_der = ca_key.serialize_der();
    let ca_params = build_root_params(config)?;
    let ca_cert = ca_params.self_signed(&ca_key)?;
    let cert_der = ca_cert.der().clone();
    let issuer = Issuer::new(ca_params, ca_key);

    tracing::debug!(
        common_name = %config.common_name,
        algorithm = ?config.key_algorithm,
        "generated self-signed root CA"
    );
    Ok(RootCertificateAuthority::from_parts(
        issuer,
        cert_der,
        key_der,
        Some(config.clone()),
    ))
}

impl RootCertificateAuthority {
    /// Pairs an existing certificate with its PKCS#8 private key.
    ///
    /// Fails when either blob does not parse, when the certificate is not
    /// usable as an issuer, or when the key does not belong to the certificate.
    pub fn assemble(
        cert_der: &[u8],
        key_der: &[u8],
        config: Option<RootCaConfig>,
    ) -> Result<Self, CodecError> {
        let (_, parsed) = parse_x509_certificate(cert_der).map_err(|error| {
            CodecError::Assembly(format!("failed to parse certificate: {error}"))
        })?;
        let ca_key = KeyPair::from_pem(&private_key_to_pem(key_der))
            .map_err(|error| CodecError::Assembly(format!("failed to parse private key: {error}")))?;
        ensure_key_signs_for(&parsed, &ca_key)?;

        let cert_der = CertificateDer::from(cert_der.to_vec());
        let issuer = Issuer::from_ca_cert_der(&cert_der, ca_key).map_err(|error| {
            CodecError::Assembly(format!("failed to read issuer metadata: {error}"))
        })?;

        Ok(Self::from_parts(
            issuer,
            cert_der,
            key_der.to_vec(),
            config,
        ))
    }

    fn from_parts(
        issuer: Issuer<'static, KeyPair>,
        cert_der: CertificateDer<'static>,
        key_der: Vec<u8>,
        config: Option<RootCaConfig>,
    ) -> Self {
        let cert_pem = certificate_to_pem(cert_der.as_ref());
        let not_after = read_not_after(cert_der.as_ref());
        let fingerprint = sha256_fingerprint(cert_der.as_ref());
        Self {
            issuer,
            cert_der,
            cert_pem,
            key_der,
            not_after,
            fingerprint,
            config,
        }
    }

    pub fn certificate_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    pub fn certificate_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn private_key_der(&self) -> &[u8] {
        &self.key_der
    }

    pub fn private_key_pem(&self) -> String {
        private_key_to_pem(&self.key_der)
    }

    pub fn config(&self) -> Option<&RootCaConfig> {
        self.config.as_ref()
    }

    /// SHA-256 over the certificate DER, lowercase hex.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// `None` when the certificate validity could not be read.
    pub fn not_after(&self) -> Option<SystemTime> {
        self.not_after
    }

    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.not_after.is_some_and(|not_after| not_after < now)
    }

    /// Exports the certificate only; the private key never leaves memory here.
    pub fn write_certificate_pem(&self, path: &Path) -> io::Result<()> {
        write_pem_file(path, &self.cert_pem)
    }

    pub(crate) fn issuer(&self) -> &Issuer<'static, KeyPair> {
        &self.issuer
    }
}

fn build_root_params(config: &RootCaConfig) -> Result<CertificateParams, CodecError> {
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.use_authority_key_identifier_extension = true;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
    ];

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, config.common_name.clone());
    distinguished_name.push(DnType::OrganizationName, config.organization.clone());
    if let Some(unit) = config.organizational_unit.as_deref() {
        if !unit.trim().is_empty() {
            distinguished_name.push(DnType::OrganizationalUnitName, unit.to_string());
        }
    }
    params.distinguished_name = distinguished_name;

    let (not_before, not_after) = config.validity_window()?;
    params.not_before = not_before;
    params.not_after = not_after;
    Ok(params)
}

/// Signs a throwaway certificate with `key` and checks it against the public
/// key of `cert`.
fn ensure_key_signs_for(cert: &X509Certificate<'_>, key: &KeyPair) -> Result<(), CodecError> {
    let witness = CertificateParams::default().self_signed(key)?;
    let (_, witness_parsed) = parse_x509_certificate(witness.der().as_ref()).map_err(|error| {
        CodecError::Assembly(format!("failed to parse key witness certificate: {error}"))
    })?;
    witness_parsed
        .verify_signature(Some(cert.public_key()))
        .map_err(|_| {
            CodecError::Assembly(
                "private key does not match the certificate public key".to_string(),
            )
        })
}

fn unix_to_offset(seconds: i64) -> Result<OffsetDateTime, CodecError> {
    OffsetDateTime::from_unix_timestamp(seconds).map_err(|error| {
        CodecError::InvalidConfiguration(format!("timestamp {seconds} out of range: {error}"))
    })
}

fn read_not_after(cert_der: &[u8]) -> Option<SystemTime> {
    let (_, parsed) = parse_x509_certificate(cert_der).ok()?;
    let seconds = parsed.validity().not_after.timestamp();
    Some(unix_to_system_time(seconds))
}

pub(crate) fn unix_to_system_time(seconds: i64) -> SystemTime {
    if seconds >= 0 {
        UNIX_EPOCH + Duration::from_secs(seconds.unsigned_abs())
    } else {
        UNIX_EPOCH - Duration::from_secs(seconds.unsigned_abs())
    }
}

fn sha256_fingerprint(cert_der: &[u8]) -> String {
    let digest = Sha256::digest(cert_der);
    let mut rendered = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        rendered.push_str(&format!("{byte:02x}"));
    }
    rendered
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use x509_parser::parse_x509_certificate;

    use super::{generate_root, RootCaConfig, RootCertificateAuthority, RootKeyAlgorithm};
    use crate::pem::{extract_certificate, extract_private_key};

    #[test]
    fn generated_root_is_a_ca_with_configured_subject() {
        let config = RootCaConfig {
            common_name: "Test Interception Root".to_string(),
            organization: "test-org".to_string(),
            ..RootCaConfig::default()
        };
        let root = generate_root(&config).expect("generate root");

        let (_, cert) = parse_x509_certificate(root.certificate_der().as_ref()).expect("parse");
        assert!(cert.is_ca());
        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .expect("commonName")
            .as_str()
            .expect("utf8");
        assert_eq!(cn, "Test Interception Root");
        assert_eq!(cert.subject(), cert.issuer());
        assert_eq!(root.fingerprint().len(), 64);
        assert_eq!(root.config(), Some(&config));
    }

    #[test]
    fn generated_root_validity_follows_validity_days() {
        let config = RootCaConfig {
            validity_days: 10,
            ..RootCaConfig::default()
        };
        let root = generate_root(&config).expect("generate root");
        let not_after = root.not_after().expect("not_after");
        let now = SystemTime::now();

        assert!(not_after > now + Duration::from_secs(9 * 24 * 60 * 60));
        assert!(not_after < now + Duration::from_secs(11 * 24 * 60 * 60));
        assert!(!root.is_expired_at(now));
    }

    #[test]
    fn explicit_past_window_produces_expired_root() {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_secs() as i64;
        let config = RootCaConfig {
            not_before_unix: Some(now - 3_600),
            not_after_unix: Some(now - 1),
            ..RootCaConfig::default()
        };
        let root = generate_root(&config).expect("generate root");
        assert!(root.is_expired_at(SystemTime::now()));
    }

    #[test]
    fn every_key_algorithm_generates_a_root() {
        for algorithm in [
            RootKeyAlgorithm::EcdsaP256,
            RootKeyAlgorithm::EcdsaP384,
            RootKeyAlgorithm::Ed25519,
        ] {
            let config = RootCaConfig {
                key_algorithm: algorithm,
                ..RootCaConfig::default()
            };
            generate_root(&config).unwrap_or_else(|error| panic!("{algorithm:?}: {error}"));
        }
    }

    #[test]
    fn invalid_config_is_rejected_before_key_generation() {
        let config = RootCaConfig {
            validity_days: 0,
            ..RootCaConfig::default()
        };
        let error = generate_root(&config).expect_err("zero validity");
        assert!(error.to_string().contains("validity_days"), "{error}");

        let config = RootCaConfig {
            common_name: "  ".to_string(),
            ..RootCaConfig::default()
        };
        assert!(generate_root(&config).is_err());
    }

    #[test]
    fn assemble_reconstructs_identical_certificate() {
        let root = generate_root(&RootCaConfig::default()).expect("generate root");
        let cert = extract_certificate(root.certificate_pem())
            .expect("cert section")
            .into_bytes()
            .expect("cert bytes");
        let key = extract_private_key(&root.private_key_pem())
            .expect("key section")
            .into_bytes()
            .expect("key bytes");

        let assembled = RootCertificateAuthority::assemble(&cert, &key, None).expect("assemble");
        assert_eq!(assembled.certificate_der(), root.certificate_der());
        assert_eq!(assembled.fingerprint(), root.fingerprint());
        assert_eq!(assembled.not_after(), root.not_after());
        assert!(assembled.config().is_none());
    }

    #[test]
    fn assemble_rejects_key_from_another_root() {
        let first = generate_root(&RootCaConfig::default()).expect("first root");
        let second = generate_root(&RootCaConfig::default()).expect("second root");

        let error = RootCertificateAuthority::assemble(
            first.certificate_der().as_ref(),
            second.private_key_der(),
            None,
        )
        .expect_err("mismatched pair");
        assert!(error.to_string().contains("does not match"), "{error}");
    }

    #[test]
    fn assemble_rejects_garbage_certificate() {
        let root = generate_root(&RootCaConfig::default()).expect("root");
        let error = RootCertificateAuthority::assemble(b"garbage", root.private_key_der(), None)
            .expect_err("garbage cert");
        assert!(error.to_string().contains("failed to parse certificate"), "{error}");
    }

    #[test]
    fn write_certificate_pem_exports_only_the_certificate() {
        let root = generate_root(&RootCaConfig::default()).expect("root");
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("root-ca.pem");

        root.write_certificate_pem(&path).expect("write pem");
        let written = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(written, root.certificate_pem());
        assert!(!written.contains("PRIVATE KEY"));
    }
}
