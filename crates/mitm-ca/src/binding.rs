use std::sync::Arc;

use mitm_tls::{LeafConfig, RootCertificateAuthority};

use crate::{BindingError, CertificateServiceHandle};

/// Receiving end inside the transport layer. Publishing `None` withdraws the
/// signing capability.
pub trait TransportHook: Send + Sync {
    fn set_certificate_service(
        &self,
        service: Option<Arc<CertificateServiceHandle>>,
    ) -> Result<(), BindingError>;
}

pub struct CertificateServiceBinding {
    hook: Option<Arc<dyn TransportHook>>,
    leaf_config: LeafConfig,
}

impl std::fmt::Debug for CertificateServiceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateServiceBinding")
            .field("hook_registered", &self.hook.is_some())
            .field("leaf_config", &self.leaf_config)
            .finish()
    }
}

impl CertificateServiceBinding {
    pub fn new(hook: Option<Arc<dyn TransportHook>>, leaf_config: LeafConfig) -> Self {
        Self { hook, leaf_config }
    }

    pub fn has_hook(&self) -> bool {
        self.hook.is_some()
    }

    /// Builds a fresh handle for `authority` and hands it to the transport.
    /// The previous handle, and its leaf cache, is released by the hook.
    pub fn bind(
        &self,
        authority: Arc<RootCertificateAuthority>,
    ) -> Result<Arc<CertificateServiceHandle>, BindingError> {
        let Some(hook) = &self.hook else {
            tracing::error!("cannot bind root CA: no transport hook registered");
            return Err(BindingError::HookUnavailable);
        };
        let fingerprint = authority.fingerprint().to_string();
        let handle = Arc::new(CertificateServiceHandle::new(
            authority,
            self.leaf_config.clone(),
        ));
        if let Err(error) = hook.set_certificate_service(Some(Arc::clone(&handle))) {
            tracing::error!(fingerprint = %fingerprint, error = %error, "failed to bind root CA");
            return Err(error);
        }
        tracing::info!(fingerprint = %fingerprint, "root CA bound to transport");
        Ok(handle)
    }

    pub fn unbind(&self) -> Result<(), BindingError> {
        let Some(hook) = &self.hook else {
            return Err(BindingError::HookUnavailable);
        };
        match hook.set_certificate_service(None) {
            Ok(()) => {
                tracing::info!("root CA unbound from transport");
                Ok(())
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to unbind root CA");
                Err(error)
            }
        }
    }
}
