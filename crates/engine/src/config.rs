use std::time::Duration;

use pricebook_core::ValidationLimits;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_MAX_PENDING_BATCHES: usize = 64;
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Editor settings. Every field has a default, so a TOML document only
/// needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Settling period before a row's batch is flushed.
    pub debounce_ms: u64,
    /// Distinct pending row batches that trigger a force-flush.
    pub max_pending_batches: usize,
    /// Ask the backend for the current version before every write.
    pub pre_commit_check: bool,
    pub limits: ValidationLimits,
    /// Buffered events per subscriber before the slowest one lags.
    pub event_capacity: usize,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_pending_batches: DEFAULT_MAX_PENDING_BATCHES,
            pre_commit_check: true,
            limits: ValidationLimits::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EditorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_pending_batches == 0 {
            return Err(EngineError::InvalidConfig(
                "max_pending_batches must be at least 1".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "event_capacity must be at least 1".into(),
            ));
        }
        if !(self.limits.max_currency.is_finite() && self.limits.max_currency > 0.0) {
            return Err(EngineError::InvalidConfig(
                "limits.max_currency must be a positive number".into(),
            ));
        }
        if self.limits.max_text_len == 0 || self.limits.max_identifier_len == 0 {
            return Err(EngineError::InvalidConfig(
                "text length limits must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
