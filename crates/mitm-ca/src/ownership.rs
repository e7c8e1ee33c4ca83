use serde::{Deserialize, Serialize};

/// Status of the legacy certificate subsystem as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyCapability {
    Deprecated,
    Supported,
}

impl Default for LegacyCapability {
    fn default() -> Self {
        Self::Deprecated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipMode {
    OwnsCaHandling,
    DelegatesToLegacy,
}

impl OwnershipMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OwnsCaHandling => "owns_ca_handling",
            Self::DelegatesToLegacy => "delegates_to_legacy",
        }
    }

    pub fn owns_ca_handling(self) -> bool {
        matches!(self, Self::OwnsCaHandling)
    }
}

/// Picks the single owner of CA responsibilities for this process.
pub fn detect_ownership(legacy: LegacyCapability) -> OwnershipMode {
    let mode = match legacy {
        LegacyCapability::Deprecated => OwnershipMode::OwnsCaHandling,
        LegacyCapability::Supported => OwnershipMode::DelegatesToLegacy,
    };
    tracing::info!(
        legacy = ?legacy,
        mode = mode.as_str(),
        "root CA ownership resolved"
    );
    mode
}
