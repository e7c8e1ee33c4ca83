use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use lru::LruCache;
use mitm_tls::{issue_leaf, normalize_host, LeafConfig, RootCertificateAuthority};
use parking_lot::Mutex;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;

use crate::{BindingError, IssueError, TransportHook};

/// A minted leaf together with the rustls key material derived from it.
#[derive(Debug, Clone)]
pub struct IssuedLeaf {
    pub certificate: Arc<mitm_tls::LeafCertificate>,
    pub certified_key: Arc<CertifiedKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeafCacheMetrics {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub leaves_issued: u64,
}

/// Signing capability for one root CA. Dropped and rebuilt whenever the bound
/// root changes, which also discards every leaf it cached.
pub struct CertificateServiceHandle {
    authority: Arc<RootCertificateAuthority>,
    leaf_config: LeafConfig,
    cache: Option<Mutex<LruCache<String, IssuedLeaf>>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    leaves_issued: AtomicU64,
}

impl fmt::Debug for CertificateServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateServiceHandle")
            .field("fingerprint", &self.authority.fingerprint())
            .field("metrics", &self.metrics_snapshot())
            .finish_non_exhaustive()
    }
}

impl CertificateServiceHandle {
    pub fn new(authority: Arc<RootCertificateAuthority>, leaf_config: LeafConfig) -> Self {
        let cache = NonZeroUsize::new(leaf_config.cache_capacity)
            .map(|capacity| Mutex::new(LruCache::new(capacity)));
        Self {
            authority,
            leaf_config,
            cache,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            leaves_issued: AtomicU64::new(0),
        }
    }

    pub fn authority(&self) -> &Arc<RootCertificateAuthority> {
        &self.authority
    }

    pub fn fingerprint(&self) -> &str {
        self.authority.fingerprint()
    }

    pub fn leaf_config(&self) -> &LeafConfig {
        &self.leaf_config
    }

    pub fn issue_leaf(&self, host: &str) -> Result<IssuedLeaf, IssueError> {
        let host = normalize_host(host).map_err(IssueError::Generation)?;
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lock().get(&host).cloned() {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(hit);
            }
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        // cache lock is not held while minting
        let certificate = issue_leaf(&self.authority, &host, &self.leaf_config)
            .map_err(IssueError::Generation)?;
        let certified_key = certificate
            .certified_key()
            .map_err(IssueError::Generation)?;
        self.leaves_issued.fetch_add(1, Ordering::Relaxed);

        let issued = IssuedLeaf {
            certificate: Arc::new(certificate),
            certified_key: Arc::new(certified_key),
        };
        if let Some(cache) = &self.cache {
            cache.lock().put(host, issued.clone());
        }
        Ok(issued)
    }

    pub fn metrics_snapshot(&self) -> LeafCacheMetrics {
        LeafCacheMetrics {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            leaves_issued: self.leaves_issued.load(Ordering::Relaxed),
        }
    }
}

/// The transport side of the binding: holds whichever handle was published
/// last and serves handshakes from it.
pub struct ActiveCertificateService {
    current: ArcSwapOption<CertificateServiceHandle>,
    default_sni_host: String,
    alpn_protocols: Vec<Vec<u8>>,
}

impl fmt::Debug for ActiveCertificateService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveCertificateService")
            .field("bound", &self.current.load().is_some())
            .field("default_sni_host", &self.default_sni_host)
            .finish_non_exhaustive()
    }
}

impl Default for ActiveCertificateService {
    fn default() -> Self {
        Self::new("localhost", &LeafConfig::default())
    }
}

impl ActiveCertificateService {
    pub fn new(default_sni_host: impl Into<String>, leaf_config: &LeafConfig) -> Self {
        Self {
            current: ArcSwapOption::empty(),
            default_sni_host: default_sni_host.into(),
            alpn_protocols: leaf_config.alpn_wire_protocols(),
        }
    }

    pub fn current(&self) -> Option<Arc<CertificateServiceHandle>> {
        self.current.load_full()
    }

    pub fn is_bound(&self) -> bool {
        self.current.load().is_some()
    }

    pub fn issue_leaf(&self, host: &str) -> Result<IssuedLeaf, IssueError> {
        let Some(handle) = self.current.load_full() else {
            return Err(IssueError::MissingAuthority);
        };
        handle.issue_leaf(host)
    }

    /// Server config that resolves leaves through this service on every
    /// handshake.
    pub fn server_config(self: &Arc<Self>) -> Arc<ServerConfig> {
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_cert_resolver(Arc::clone(self) as Arc<dyn ResolvesServerCert>);
        config.alpn_protocols = self.alpn_protocols.clone();
        Arc::new(config)
    }
}

impl TransportHook for ActiveCertificateService {
    fn set_certificate_service(
        &self,
        service: Option<Arc<CertificateServiceHandle>>,
    ) -> Result<(), BindingError> {
        self.current.store(service);
        Ok(())
    }
}

impl ResolvesServerCert for ActiveCertificateService {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let host = client_hello
            .server_name()
            .unwrap_or(self.default_sni_host.as_str());
        match self.issue_leaf(host) {
            Ok(issued) => Some(issued.certified_key),
            Err(IssueError::MissingAuthority) => {
                tracing::warn!(host, "refusing TLS handshake: no root CA is bound");
                None
            }
            Err(error) => {
                tracing::error!(host, error = %error, "refusing TLS handshake: leaf issuance failed");
                None
            }
        }
    }
}
