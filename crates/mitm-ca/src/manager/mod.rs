//! Root CA lifecycle entry point.
//!
//! The manager decides once whether this process owns CA handling or defers to
//! the legacy subsystem, then routes every operation through the matching
//! strategy. Hosts call [`RootCertificateManager::ensure_active_authority`] at
//! startup and [`RootCertificateManager::shutdown`] when unloading.

mod delegated;
mod owned;


use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::{
    detect_ownership, ActiveCertificateService, AuthorityStore, CertificateServiceBinding,
    ExpiryPrompt, FileAuthorityStore, ImportFailure, LegacyCertificateSubsystem,
    MemoryAuthorityStore, OwnershipMode, RootCaConfig, RootCaError, RootCaManagerConfig,
    RootCaMaterial, TransportHook,
};

use delegated::DelegatedCaHandling;
use owned::OwnedCaHandling;

/// Outcome of [`RootCertificateManager::ensure_active_authority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityStatus {
    /// The legacy subsystem owns the root CA; nothing was touched.
    Delegated,
    /// A new root was generated, stored and bound.
    GeneratedAndBound,
    /// The stored root is bound and within its validity window.
    Bound,
    /// The stored root had expired. It stays bound unless the expiry prompt
    /// confirmed regeneration and the replacement was bound instead.
    BoundExpired,
    /// No signing capability could be published.
    Unavailable,
}

impl AuthorityStatus {
    pub fn is_bound(self) -> bool {
        matches!(
            self,
            Self::GeneratedAndBound | Self::Bound | Self::BoundExpired
        )
    }
}

pub(crate) trait CaHandling: Send + Sync {
    fn ensure_active_authority(&self) -> AuthorityStatus;

    fn generate_root_certificate(&self) -> bool;

    fn import_from_file(&self, pem_file: &Path) -> Result<(), ImportFailure>;

    fn import_from_pem(&self, pem: &[u8]) -> Result<(), ImportFailure>;

    fn root_ca_material(&self) -> Option<RootCaMaterial>;

    fn generation_config(&self) -> Option<RootCaConfig>;

    fn write_certificate_pem(&self, destination: &Path) -> Result<(), RootCaError>;

    fn shutdown(&self);
}

/// Collaborators injected into the manager.
pub struct ManagerParts {
    store: Arc<dyn AuthorityStore>,
    transport: Option<Arc<dyn TransportHook>>,
    active_service: Option<Arc<ActiveCertificateService>>,
    legacy: Option<Arc<dyn LegacyCertificateSubsystem>>,
    prompt: Option<Arc<dyn ExpiryPrompt>>,
}

impl fmt::Debug for ManagerParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerParts")
            .field("transport", &self.transport.is_some())
            .field("active_service", &self.active_service.is_some())
            .field("legacy", &self.legacy.is_some())
            .field("prompt", &self.prompt.is_some())
            .finish_non_exhaustive()
    }
}

impl ManagerParts {
    pub fn new(store: Arc<dyn AuthorityStore>) -> Self {
        Self {
            store,
            transport: None,
            active_service: None,
            legacy: None,
            prompt: None,
        }
    }

    /// File-backed store when `store_path` is set, in-memory otherwise, plus a
    /// fresh [`ActiveCertificateService`] as the transport hook.
    pub fn from_config(config: &RootCaManagerConfig) -> Self {
        let store: Arc<dyn AuthorityStore> = match &config.store_path {
            Some(path) => Arc::new(FileAuthorityStore::new(path, config.root_ca.clone())),
            None => Arc::new(MemoryAuthorityStore::new(config.root_ca.clone())),
        };
        let service = Arc::new(ActiveCertificateService::new(
            config.default_sni_host.clone(),
            &config.leaf,
        ));
        Self::new(store).with_active_service(service)
    }

    pub fn with_transport(mut self, hook: Arc<dyn TransportHook>) -> Self {
        self.transport = Some(hook);
        self.active_service = None;
        self
    }

    pub fn with_active_service(mut self, service: Arc<ActiveCertificateService>) -> Self {
        self.transport = Some(Arc::clone(&service) as Arc<dyn TransportHook>);
        self.active_service = Some(service);
        self
    }

    pub fn with_legacy(mut self, legacy: Arc<dyn LegacyCertificateSubsystem>) -> Self {
        self.legacy = Some(legacy);
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn ExpiryPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }
}

pub struct RootCertificateManager {
    mode: OwnershipMode,
    handling: Box<dyn CaHandling>,
    active_service: Option<Arc<ActiveCertificateService>>,
}

impl fmt::Debug for RootCertificateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootCertificateManager")
            .field("mode", &self.mode)
            .field("active_service", &self.active_service)
            .finish_non_exhaustive()
    }
}

impl RootCertificateManager {
    /// Fresh roots are generated from the store's
    /// [`AuthorityStore::generation_config`]. `config.root_ca` only seeds the
    /// stores built by [`ManagerParts::from_config`]; a store supplied through
    /// [`ManagerParts::new`] keeps its own configuration.
    pub fn new(config: RootCaManagerConfig, parts: ManagerParts) -> Result<Self, RootCaError> {
        config.validate()?;
        let mode = detect_ownership(config.legacy_subsystem);
        if mode.owns_ca_handling() && parts.store.generation_config() != config.root_ca {
            tracing::warn!(
                common_name = %parts.store.generation_config().common_name,
                "store generation config differs from root_ca, using the store's"
            );
        }
        let ManagerParts {
            store,
            transport,
            active_service,
            legacy,
            prompt,
        } = parts;

        let handling: Box<dyn CaHandling> = match mode {
            OwnershipMode::OwnsCaHandling => Box::new(OwnedCaHandling::new(
                store,
                CertificateServiceBinding::new(transport, config.leaf),
                prompt,
            )),
            OwnershipMode::DelegatesToLegacy => Box::new(DelegatedCaHandling::new(legacy)),
        };
        Ok(Self {
            mode,
            handling,
            active_service,
        })
    }

    pub fn ownership_mode(&self) -> OwnershipMode {
        self.mode
    }

    /// Transport-side service, when the manager was built with one.
    pub fn active_service(&self) -> Option<&Arc<ActiveCertificateService>> {
        self.active_service.as_ref()
    }

    pub fn ensure_active_authority(&self) -> AuthorityStatus {
        self.handling.ensure_active_authority()
    }

    pub fn generate_root_certificate(&self) -> bool {
        self.handling.generate_root_certificate()
    }

    pub fn import_root_certificate(&self, pem_file: &Path) -> Result<(), ImportFailure> {
        self.handling.import_from_file(pem_file)
    }

    pub fn import_root_certificate_pem(&self, pem: &[u8]) -> Result<(), ImportFailure> {
        self.handling.import_from_pem(pem)
    }

    pub fn root_ca_material(&self) -> Option<RootCaMaterial> {
        self.handling.root_ca_material()
    }

    /// Configuration used for the next generated root; `None` when delegating.
    pub fn generation_config(&self) -> Option<RootCaConfig> {
        self.handling.generation_config()
    }

    /// Writes only the certificate, never the private key.
    pub fn write_root_ca_cert_as_pem(&self, destination: &Path) -> Result<(), RootCaError> {
        self.handling.write_certificate_pem(destination)?;
        tracing::info!(path = %destination.display(), "exported root CA certificate");
        Ok(())
    }

    pub fn shutdown(&self) {
        self.handling.shutdown();
    }
}
