use std::path::Path;

use serde::{Deserialize, Serialize};

/// PEM text of the active root CA, as exported to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootCaMaterial {
    pub certificate_pem: String,
    pub private_key_pem: String,
}

impl RootCaMaterial {
    pub fn from_authority(authority: &mitm_tls::RootCertificateAuthority) -> Self {
        Self {
            certificate_pem: authority.certificate_pem().to_string(),
            private_key_pem: authority.private_key_pem(),
        }
    }
}

/// The older certificate subsystem that still owns CA handling on hosts which
/// keep it enabled. Only consulted in delegating mode.
pub trait LegacyCertificateSubsystem: Send + Sync {
    fn create_new_root_ca(&self) -> Result<(), String>;

    /// Returns an empty string on success, otherwise a user-facing message.
    fn import_root_ca_certificate(&self, pem_file: &Path) -> String;

    /// In-memory import. `None` means the subsystem only accepts files.
    fn import_root_ca_pem(&self, _pem: &[u8]) -> Option<String> {
        None
    }

    fn root_ca_material(&self) -> Option<RootCaMaterial>;
}
