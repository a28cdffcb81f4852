//! Ledger tuning knobs.

use serde::Deserialize;
use thiserror::Error;

pub const MAX_LOTS_ENV: &str = "WALLET_LEDGER_MAX_LOTS_PER_PAGE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got '{value}'")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Upper bound on lots fetched per allocator call during a debit.
    pub max_lots_per_page: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_lots_per_page: 100,
        }
    }
}

impl LedgerConfig {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(raw) = lookup(MAX_LOTS_ENV) {
            config.max_lots_per_page = match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: MAX_LOTS_ENV,
                        value: raw,
                    });
                }
            };
        }
        Ok(config)
    }
}
