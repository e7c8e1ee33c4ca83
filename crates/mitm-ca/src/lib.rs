//! Root CA lifecycle for a TLS-intercepting proxy.
//!
//! Loads, generates, imports and exports the interception root, detects
//! expiry, and publishes the active root to the transport as a
//! [`CertificateServiceHandle`] from which per-host leaves are minted during
//! handshakes.

mod binding;
mod config;
mod errors;
mod legacy;
mod manager;
mod ownership;
mod prompt;
mod service;
mod store;

pub use binding::{CertificateServiceBinding, TransportHook};
pub use config::RootCaManagerConfig;
pub use errors::{BindingError, ImportFailure, IssueError, RootCaError, StoreError};
pub use legacy::{LegacyCertificateSubsystem, RootCaMaterial};
pub use manager::{AuthorityStatus, ManagerParts, RootCertificateManager};
pub use ownership::{detect_ownership, LegacyCapability, OwnershipMode};
pub use prompt::{ExpiryPrompt, ExpiryWarning};
pub use service::{ActiveCertificateService, CertificateServiceHandle, IssuedLeaf, LeafCacheMetrics};
pub use store::{AuthorityStore, FileAuthorityStore, MemoryAuthorityStore, StoredAuthority};

pub use mitm_tls::{LeafCertificate, LeafConfig, RootCaConfig, RootCertificateAuthority};
