use std::path::PathBuf;

use mitm_tls::{LeafConfig, RootCaConfig};
use serde::{Deserialize, Serialize};

use crate::{LegacyCapability, RootCaError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RootCaManagerConfig {
    pub legacy_subsystem: LegacyCapability,
    /// JSON document holding the persisted root; `None` keeps it in memory.
    pub store_path: Option<PathBuf>,
    pub root_ca: RootCaConfig,
    pub leaf: LeafConfig,
    /// Host used for leaf issuance when a client sends no SNI.
    pub default_sni_host: String,
}

impl Default for RootCaManagerConfig {
    fn default() -> Self {
        Self {
            legacy_subsystem: LegacyCapability::Deprecated,
            store_path: None,
            root_ca: RootCaConfig::default(),
            leaf: LeafConfig::default(),
            default_sni_host: "localhost".to_string(),
        }
    }
}

impl RootCaManagerConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, RootCaError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|error| RootCaError::InvalidConfig(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RootCaError> {
        self.root_ca
            .validate()
            .map_err(|error| RootCaError::InvalidConfig(format!("root_ca: {error}")))?;
        self.leaf
            .validate()
            .map_err(|error| RootCaError::InvalidConfig(format!("leaf: {error}")))?;
        if self.default_sni_host.trim().is_empty() {
            return Err(RootCaError::InvalidConfig(
                "default_sni_host must not be empty".to_string(),
            ));
        }
        if let Some(path) = &self.store_path {
            if path.as_os_str().is_empty() {
                return Err(RootCaError::InvalidConfig(
                    "store_path must not be empty when set".to_string(),
                ));
            }
        }
        Ok(())
    }
}
