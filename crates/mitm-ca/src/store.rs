use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mitm_tls::pem::{extract_certificate, extract_private_key};
use mitm_tls::{RootCaConfig, RootCertificateAuthority};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::StoreError;

const STORED_AUTHORITY_VERSION: u32 = 1;

/// Durable home of the configured root CA.
///
/// Readers observe either a complete authority or none; `save` replaces the
/// previous authority in one step.
pub trait AuthorityStore: Send + Sync {
    fn load(&self) -> Result<Option<Arc<RootCertificateAuthority>>, StoreError>;

    fn save(&self, authority: Arc<RootCertificateAuthority>) -> Result<(), StoreError>;

    fn generation_config(&self) -> RootCaConfig;
}

#[derive(Debug, Default)]
pub struct MemoryAuthorityStore {
    authority: RwLock<Option<Arc<RootCertificateAuthority>>>,
    generation_config: RootCaConfig,
}

impl MemoryAuthorityStore {
    pub fn new(generation_config: RootCaConfig) -> Self {
        Self {
            authority: RwLock::new(None),
            generation_config,
        }
    }

    pub fn with_authority(
        generation_config: RootCaConfig,
        authority: Arc<RootCertificateAuthority>,
    ) -> Self {
        Self {
            authority: RwLock::new(Some(authority)),
            generation_config,
        }
    }
}

impl AuthorityStore for MemoryAuthorityStore {
    fn load(&self) -> Result<Option<Arc<RootCertificateAuthority>>, StoreError> {
        Ok(self.authority.read().clone())
    }

    fn save(&self, authority: Arc<RootCertificateAuthority>) -> Result<(), StoreError> {
        *self.authority.write() = Some(authority);
        Ok(())
    }

    fn generation_config(&self) -> RootCaConfig {
        self.generation_config.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoredAuthority {
    pub version: u32,
    pub certificate_pem: String,
    pub private_key_pem: String,
    pub config: Option<RootCaConfig>,
}

impl StoredAuthority {
    pub fn from_authority(authority: &RootCertificateAuthority) -> Self {
        Self {
            version: STORED_AUTHORITY_VERSION,
            certificate_pem: authority.certificate_pem().to_string(),
            private_key_pem: authority.private_key_pem(),
            config: authority.config().cloned(),
        }
    }

    pub fn into_authority(self) -> Result<RootCertificateAuthority, StoreError> {
        if self.version != STORED_AUTHORITY_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported stored authority version {}",
                self.version
            )));
        }
        let cert = extract_certificate(&self.certificate_pem)
            .map_err(|error| StoreError::Corrupt(format!("certificate: {error}")))?
            .into_bytes()
            .ok_or_else(|| StoreError::Corrupt("certificate section missing".to_string()))?;
        let key = extract_private_key(&self.private_key_pem)
            .map_err(|error| StoreError::Corrupt(format!("private key: {error}")))?
            .into_bytes()
            .ok_or_else(|| StoreError::Corrupt("private key section missing".to_string()))?;
        Ok(RootCertificateAuthority::assemble(&cert, &key, self.config)?)
    }
}

/// Keeps the root CA in a single JSON document, replaced through a rename so
/// a crash mid-write leaves the previous document intact.
#[derive(Debug)]
pub struct FileAuthorityStore {
    path: PathBuf,
    generation_config: RootCaConfig,
    cached: RwLock<Option<Arc<RootCertificateAuthority>>>,
}

impl FileAuthorityStore {
    pub fn new(path: impl Into<PathBuf>, generation_config: RootCaConfig) -> Self {
        Self {
            path: path.into(),
            generation_config,
            cached: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Option<StoredAuthority>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(StoreError::Io(error)),
        };
        let document = serde_json::from_str(&raw).map_err(|error| {
            StoreError::Corrupt(format!("{}: {error}", self.path.display()))
        })?;
        Ok(Some(document))
    }

    fn write_document(&self, document: &StoredAuthority) -> Result<(), StoreError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let body = serde_json::to_vec_pretty(document)
            .map_err(|error| StoreError::Corrupt(format!("serialize: {error}")))?;
        let mut staged = NamedTempFile::new_in(&parent)?;
        staged.write_all(&body)?;
        staged.as_file().sync_all()?;
        staged
            .persist(&self.path)
            .map_err(|error| StoreError::Io(error.error))?;
        Ok(())
    }
}

impl AuthorityStore for FileAuthorityStore {
    fn load(&self) -> Result<Option<Arc<RootCertificateAuthority>>, StoreError> {
        if let Some(authority) = self.cached.read().clone() {
            return Ok(Some(authority));
        }

        let Some(document) = self.read_document()? else {
            return Ok(None);
        };
        let authority = Arc::new(document.into_authority()?);
        *self.cached.write() = Some(Arc::clone(&authority));
        tracing::debug!(
            path = %self.path.display(),
            fingerprint = authority.fingerprint(),
            "loaded root CA from store"
        );
        Ok(Some(authority))
    }

    fn save(&self, authority: Arc<RootCertificateAuthority>) -> Result<(), StoreError> {
        self.write_document(&StoredAuthority::from_authority(&authority))?;
        *self.cached.write() = Some(authority);
        Ok(())
    }

    fn generation_config(&self) -> RootCaConfig {
        self.generation_config.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use mitm_tls::{generate_root, RootCaConfig};

    use super::{AuthorityStore, FileAuthorityStore, MemoryAuthorityStore, StoredAuthority};
    use crate::StoreError;

    #[test]
    fn memory_store_starts_empty_and_replaces_whole_authorities() {
        let store = MemoryAuthorityStore::new(RootCaConfig::default());
        assert!(store.load().expect("load").is_none());

        let first = Arc::new(generate_root(&RootCaConfig::default()).expect("first"));
        let second = Arc::new(generate_root(&RootCaConfig::default()).expect("second"));
        store.save(Arc::clone(&first)).expect("save first");
        store.save(Arc::clone(&second)).expect("save second");

        let loaded = store.load().expect("load").expect("present");
        assert!(Arc::ptr_eq(&loaded, &second));
    }

    #[test]
    fn file_store_missing_document_loads_as_empty() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileAuthorityStore::new(dir.path().join("root-ca.json"), RootCaConfig::default());
        assert!(store.load().expect("load").is_none());
    }

    #[test]
    fn file_store_round_trips_authority_across_instances() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("state").join("root-ca.json");
        let authority = Arc::new(generate_root(&RootCaConfig::default()).expect("root"));

        FileAuthorityStore::new(&path, RootCaConfig::default())
            .save(Arc::clone(&authority))
            .expect("save");

        let reopened = FileAuthorityStore::new(&path, RootCaConfig::default());
        let loaded = reopened.load().expect("load").expect("present");
        assert_eq!(loaded.certificate_der(), authority.certificate_der());
        assert_eq!(loaded.private_key_der(), authority.private_key_der());
        assert_eq!(loaded.config(), authority.config());
    }

    #[test]
    fn file_store_reports_corrupt_document_instead_of_empty() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("root-ca.json");
        fs::write(&path, b"{ not json").expect("write corrupt");

        let store = FileAuthorityStore::new(&path, RootCaConfig::default());
        match store.load() {
            Err(StoreError::Corrupt(detail)) => assert!(detail.contains("root-ca.json"), "{detail}"),
            other => panic!("expected corrupt store error, got {other:?}"),
        }
    }

    #[test]
    fn stored_authority_rejects_unknown_versions() {
        let authority = generate_root(&RootCaConfig::default()).expect("root");
        let mut document = StoredAuthority::from_authority(&authority);
        document.version = 99;
        assert!(matches!(
            document.into_authority(),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn stored_document_never_contains_partial_state() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("root-ca.json");
        let store = FileAuthorityStore::new(&path, RootCaConfig::default());

        for _ in 0..3 {
            let authority = Arc::new(generate_root(&RootCaConfig::default()).expect("root"));
            store.save(Arc::clone(&authority)).expect("save");
            let raw = fs::read_to_string(&path).expect("read");
            let document: StoredAuthority = serde_json::from_str(&raw).expect("complete json");
            assert_eq!(document.certificate_pem, authority.certificate_pem());
        }
        let leftovers = fs::read_dir(dir.path()).expect("list").count();
        assert_eq!(leftovers, 1, "staging files must not be left behind");
    }
}
