use std::time::Duration;

use serde::Deserialize;

use crate::error::CryptoError;

/// One-time pre-keys generated with a fresh bundle.
pub const INITIAL_PRE_KEY_COUNT: usize = 100;
/// Pool size below which replenishment kicks in.
pub const REPLENISH_THRESHOLD: usize = 20;
/// Pre-keys appended per replenishment.
pub const REFILL_COUNT: usize = 100;
/// Upper bound on a single secure-store call.
pub const STORE_TIMEOUT_MS: u64 = 5_000;

/// Tunables for key bundle lifecycle and secure-store access.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    pub initial_pre_key_count: usize,
    pub replenish_threshold: usize,
    pub refill_count: usize,
    pub store_timeout_ms: u64,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            initial_pre_key_count: INITIAL_PRE_KEY_COUNT,
            replenish_threshold: REPLENISH_THRESHOLD,
            refill_count: REFILL_COUNT,
            store_timeout_ms: STORE_TIMEOUT_MS,
        }
    }
}

impl KeyConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, CryptoError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}
