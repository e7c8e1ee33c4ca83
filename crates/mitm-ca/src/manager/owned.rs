use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use mitm_tls::pem::{extract_certificate, extract_private_key, PemSection};
use mitm_tls::{generate_root, RootCaConfig, RootCertificateAuthority};
use parking_lot::Mutex;

use super::{AuthorityStatus, CaHandling};
use crate::{
    AuthorityStore, CertificateServiceBinding, CertificateServiceHandle, ExpiryPrompt,
    ExpiryWarning, ImportFailure, RootCaError, RootCaMaterial,
};

/// This process owns the root CA: it reads and writes the store and publishes
/// handles to the transport.
///
/// Mutations serialize on `operation_lock`. Leaf issuance never takes it. The
/// expiry prompt runs under the lock, so a prompt must not call back into the
/// manager.
pub(super) struct OwnedCaHandling {
    store: Arc<dyn AuthorityStore>,
    binding: CertificateServiceBinding,
    prompt: Option<Arc<dyn ExpiryPrompt>>,
    operation_lock: Mutex<()>,
}

impl OwnedCaHandling {
    pub(super) fn new(
        store: Arc<dyn AuthorityStore>,
        binding: CertificateServiceBinding,
        prompt: Option<Arc<dyn ExpiryPrompt>>,
    ) -> Self {
        Self {
            store,
            binding,
            prompt,
            operation_lock: Mutex::new(()),
        }
    }

    /// Generate, persist, bind. The store is only written once generation
    /// succeeded, and nothing is bound unless the store accepted the root.
    fn generate_and_bind_locked(&self) -> Result<Arc<CertificateServiceHandle>, RootCaError> {
        let config = self.store.generation_config();
        let authority = match generate_root(&config) {
            Ok(authority) => Arc::new(authority),
            Err(error) => {
                tracing::error!(error = %error, "failed to generate root CA");
                return Err(RootCaError::Generation(error));
            }
        };
        if let Err(error) = self.store.save(Arc::clone(&authority)) {
            tracing::error!(error = %error, "failed to persist generated root CA");
            return Err(error.into());
        }
        tracing::info!(
            fingerprint = authority.fingerprint(),
            common_name = %config.common_name,
            "generated new root CA"
        );
        Ok(self.binding.bind(authority)?)
    }

    fn handle_expired_locked(
        &self,
        authority: &RootCertificateAuthority,
        not_after: SystemTime,
        now: SystemTime,
    ) -> AuthorityStatus {
        let warning = ExpiryWarning { not_after, now };
        tracing::warn!(
            fingerprint = authority.fingerprint(),
            not_after = warning.not_after_unix(),
            now = warning.now_unix(),
            message_key = warning.message_key(),
            "root CA certificate has expired"
        );

        let Some(prompt) = &self.prompt else {
            return AuthorityStatus::BoundExpired;
        };
        if !prompt.confirm_regenerate(&warning) {
            tracing::info!("regeneration of expired root CA declined");
            return AuthorityStatus::BoundExpired;
        }
        match self.generate_and_bind_locked() {
            Ok(handle) => {
                tracing::info!(
                    expired = authority.fingerprint(),
                    replacement = handle.fingerprint(),
                    "expired root CA replaced"
                );
                AuthorityStatus::BoundExpired
            }
            Err(error) => {
                tracing::warn!(error = %error, "expired root CA stays bound after failed regeneration");
                prompt.regeneration_failed(&error);
                AuthorityStatus::BoundExpired
            }
        }
    }

    fn assemble_import(pem: &[u8]) -> Result<RootCertificateAuthority, ImportFailure> {
        // bytes outside the PEM sections are not our concern
        let text = String::from_utf8_lossy(pem);

        let cert_der = match extract_certificate(&text) {
            Ok(PemSection::Found(der)) => der,
            Ok(PemSection::Missing) => return Err(ImportFailure::MissingCertificateSection),
            Err(_) => return Err(ImportFailure::CertificateNotBase64),
        };
        let key_der = match extract_private_key(&text) {
            Ok(PemSection::Found(der)) => der,
            Ok(PemSection::Missing) => return Err(ImportFailure::MissingPrivateKeySection),
            Err(_) => return Err(ImportFailure::PrivateKeyNotBase64),
        };
        RootCertificateAuthority::assemble(&cert_der, &key_der, None).map_err(|error| {
            ImportFailure::KeyStoreAssembly {
                detail: error.to_string(),
            }
        })
    }
}

impl CaHandling for OwnedCaHandling {
    fn ensure_active_authority(&self) -> AuthorityStatus {
        let _guard = self.operation_lock.lock();

        let stored = match self.store.load() {
            Ok(stored) => stored,
            Err(error) => {
                tracing::error!(error = %error, "failed to read root CA from store");
                return AuthorityStatus::Unavailable;
            }
        };
        let Some(authority) = stored else {
            tracing::info!("no root CA configured, generating one");
            return match self.generate_and_bind_locked() {
                Ok(_) => AuthorityStatus::GeneratedAndBound,
                Err(_) => AuthorityStatus::Unavailable,
            };
        };

        if self.binding.bind(Arc::clone(&authority)).is_err() {
            return AuthorityStatus::Unavailable;
        }
        let now = SystemTime::now();
        match authority.not_after() {
            Some(not_after) if authority.is_expired_at(now) => {
                self.handle_expired_locked(&authority, not_after, now)
            }
            Some(_) => AuthorityStatus::Bound,
            None => {
                tracing::warn!(
                    fingerprint = authority.fingerprint(),
                    "root CA validity could not be read, skipping expiry check"
                );
                AuthorityStatus::Bound
            }
        }
    }

    fn generate_root_certificate(&self) -> bool {
        let _guard = self.operation_lock.lock();
        self.generate_and_bind_locked().is_ok()
    }

    fn import_from_file(&self, pem_file: &Path) -> Result<(), ImportFailure> {
        let pem = fs::read(pem_file).map_err(|error| {
            let failure = ImportFailure::ReadFailed {
                detail: format!("{}: {error}", pem_file.display()),
            };
            tracing::warn!(
                path = %pem_file.display(),
                message_key = failure.message_key(),
                error = %error,
                "root CA import failed"
            );
            failure
        })?;
        self.import_from_pem(&pem)
    }

    fn import_from_pem(&self, pem: &[u8]) -> Result<(), ImportFailure> {
        let authority = match Self::assemble_import(pem) {
            Ok(authority) => Arc::new(authority),
            Err(failure) => {
                tracing::warn!(
                    message_key = failure.message_key(),
                    error = %failure,
                    "root CA import failed"
                );
                return Err(failure);
            }
        };

        let _guard = self.operation_lock.lock();
        if let Err(error) = self.store.save(Arc::clone(&authority)) {
            let failure = ImportFailure::KeyStoreAssembly {
                detail: error.to_string(),
            };
            tracing::warn!(
                message_key = failure.message_key(),
                error = %error,
                "root CA import could not be stored"
            );
            return Err(failure);
        }
        tracing::info!(fingerprint = authority.fingerprint(), "imported root CA");

        // the import stands even when the transport cannot take it yet
        if let Err(error) = self.binding.bind(authority) {
            tracing::warn!(error = %error, "imported root CA was stored but not bound");
        }
        Ok(())
    }

    fn root_ca_material(&self) -> Option<RootCaMaterial> {
        match self.store.load() {
            Ok(authority) => authority.map(|authority| RootCaMaterial::from_authority(&authority)),
            Err(error) => {
                tracing::warn!(error = %error, "failed to read root CA for export");
                None
            }
        }
    }

    fn generation_config(&self) -> Option<RootCaConfig> {
        Some(self.store.generation_config())
    }

    fn write_certificate_pem(&self, destination: &Path) -> Result<(), RootCaError> {
        let authority = self.store.load()?.ok_or(RootCaError::MissingAuthority)?;
        authority.write_certificate_pem(destination)?;
        Ok(())
    }

    fn shutdown(&self) {
        let _guard = self.operation_lock.lock();
        if self.binding.has_hook() {
            // unbind logs its own failure
            let _ = self.binding.unbind();
        }
    }
}
