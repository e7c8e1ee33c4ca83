use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),
    #[error("invalid root CA configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to assemble root CA from certificate and key: {0}")]
    Assembly(String),
    #[error("invalid leaf host identity: {0}")]
    InvalidHost(String),
    #[error("failed to build signing key: {0}")]
    Signing(#[from] rustls::Error),
}
