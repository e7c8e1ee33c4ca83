//! Root CA material and leaf certificate issuance for TLS interception.
//!
//! This crate knows how to build, parse, pair and export root CA material and
//! how to mint per-host leaves from it. It holds no lifecycle state; deciding
//! which root is authoritative is the job of `mitm-ca`.

mod error;
pub mod leaf;
pub mod pem;
mod root_ca;

pub use error::CodecError;
pub use leaf::{issue_leaf, normalize_host, LeafCertificate, LeafConfig};
pub use pem::{
    BEGIN_CERTIFICATE_TOKEN, BEGIN_PRIVATE_KEY_TOKEN, END_CERTIFICATE_TOKEN,
    END_PRIVATE_KEY_TOKEN,
};
pub use root_ca::{generate_root, RootCaConfig, RootCertificateAuthority, RootKeyAlgorithm};
