use std::time::{SystemTime, UNIX_EPOCH};

use crate::RootCaError;

/// Raised when the stored root CA is past its `not_after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryWarning {
    pub not_after: SystemTime,
    pub now: SystemTime,
}

impl ExpiryWarning {
    pub const MESSAGE_KEY: &'static str = "ca.root.expired";

    pub fn message_key(&self) -> &'static str {
        Self::MESSAGE_KEY
    }

    pub fn not_after_unix(&self) -> i64 {
        unix_seconds(self.not_after)
    }

    pub fn now_unix(&self) -> i64 {
        unix_seconds(self.now)
    }

    /// `[not_after, now]` as unix seconds.
    pub fn message_args(&self) -> Vec<String> {
        vec![self.not_after_unix().to_string(), self.now_unix().to_string()]
    }
}

fn unix_seconds(value: SystemTime) -> i64 {
    match value.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(before) => -(before.duration().as_secs() as i64),
    }
}

/// Interactive confirmation channel. Headless hosts simply do not supply one.
pub trait ExpiryPrompt: Send + Sync {
    fn confirm_regenerate(&self, warning: &ExpiryWarning) -> bool;

    fn regeneration_failed(&self, _error: &RootCaError) {}
}
