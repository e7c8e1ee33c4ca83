use std::path::Path;
use std::sync::Arc;

use mitm_tls::pem::write_pem_file;
use mitm_tls::RootCaConfig;

use super::{AuthorityStatus, CaHandling};
use crate::{ImportFailure, LegacyCertificateSubsystem, RootCaError, RootCaMaterial};

/// The legacy subsystem still owns the root CA. Nothing here touches the store
/// or the transport.
pub(super) struct DelegatedCaHandling {
    legacy: Option<Arc<dyn LegacyCertificateSubsystem>>,
}

impl DelegatedCaHandling {
    pub(super) fn new(legacy: Option<Arc<dyn LegacyCertificateSubsystem>>) -> Self {
        if legacy.is_none() {
            tracing::warn!("delegating root CA handling but no legacy subsystem was supplied");
        }
        Self { legacy }
    }

    fn delegate_result(message: String) -> Result<(), ImportFailure> {
        if message.is_empty() {
            Ok(())
        } else {
            tracing::warn!(message = %message, "legacy subsystem rejected root CA import");
            Err(ImportFailure::Delegate { message })
        }
    }
}

impl CaHandling for DelegatedCaHandling {
    fn ensure_active_authority(&self) -> AuthorityStatus {
        tracing::debug!("root CA lifecycle is handled by the legacy subsystem");
        AuthorityStatus::Delegated
    }

    fn generate_root_certificate(&self) -> bool {
        let Some(legacy) = &self.legacy else {
            return false;
        };
        match legacy.create_new_root_ca() {
            Ok(()) => true,
            Err(error) => {
                tracing::error!(error = %error, "legacy subsystem failed to generate root CA");
                false
            }
        }
    }

    fn import_from_file(&self, pem_file: &Path) -> Result<(), ImportFailure> {
        let Some(legacy) = &self.legacy else {
            return Err(ImportFailure::DelegateUnavailable);
        };
        Self::delegate_result(legacy.import_root_ca_certificate(pem_file))
    }

    fn import_from_pem(&self, pem: &[u8]) -> Result<(), ImportFailure> {
        match self
            .legacy
            .as_ref()
            .and_then(|legacy| legacy.import_root_ca_pem(pem))
        {
            Some(message) => Self::delegate_result(message),
            None => Err(ImportFailure::DelegateUnavailable),
        }
    }

    fn root_ca_material(&self) -> Option<RootCaMaterial> {
        self.legacy.as_ref()?.root_ca_material()
    }

    fn generation_config(&self) -> Option<RootCaConfig> {
        None
    }

    fn write_certificate_pem(&self, destination: &Path) -> Result<(), RootCaError> {
        let material = self.root_ca_material().ok_or(RootCaError::MissingAuthority)?;
        write_pem_file(destination, &material.certificate_pem)?;
        Ok(())
    }

    fn shutdown(&self) {}
}
