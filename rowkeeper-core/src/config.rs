//! Store configuration

use crate::{ConfigError, RowkeeperResult};
use serde::{Deserialize, Serialize};

/// Behavior switches shared by a database handle and the DAOs using it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Open read-only when opening for writing fails.
    pub read_only_fallback: bool,
    /// Reject external values naming columns the schema does not declare.
    pub strict_external_columns: bool,
    /// Row limit applied to fetches that do not give one.
    pub default_fetch_limit: Option<u32>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            read_only_fallback: true,
            strict_external_columns: true,
            default_fetch_limit: None,
        }
    }
}

impl StoreConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `ROWKEEPER_READ_ONLY_FALLBACK`: `true`/`false` (default: true)
    /// - `ROWKEEPER_STRICT_EXTERNAL_COLUMNS`: `true`/`false` (default: true)
    /// - `ROWKEEPER_DEFAULT_FETCH_LIMIT`: positive integer (default: unset)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            read_only_fallback: std::env::var("ROWKEEPER_READ_ONLY_FALLBACK")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.read_only_fallback),
            strict_external_columns: std::env::var("ROWKEEPER_STRICT_EXTERNAL_COLUMNS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.strict_external_columns),
            default_fetch_limit: std::env::var("ROWKEEPER_DEFAULT_FETCH_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(defaults.default_fetch_limit),
        }
    }

    pub fn with_read_only_fallback(mut self, enabled: bool) -> Self {
        self.read_only_fallback = enabled;
        self
    }

    pub fn with_strict_external_columns(mut self, enabled: bool) -> Self {
        self.strict_external_columns = enabled;
        self
    }

    pub fn with_default_fetch_limit(mut self, limit: Option<u32>) -> Self {
        self.default_fetch_limit = limit;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> RowkeeperResult<()> {
        if self.default_fetch_limit == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "default_fetch_limit".to_string(),
                value: "0".to_string(),
                reason: "must be positive when set".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StoreConfig::default();
        assert!(config.read_only_fallback);
        assert!(config.strict_external_columns);
        assert_eq!(config.default_fetch_limit, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_fetch_limit_rejected() {
        let config = StoreConfig::default().with_default_fetch_limit(Some(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builders() {
        let config = StoreConfig::default()
            .with_strict_external_columns(false)
            .with_read_only_fallback(false)
            .with_default_fetch_limit(Some(50));
        assert!(!config.strict_external_columns);
        assert!(!config.read_only_fallback);
        assert_eq!(config.default_fetch_limit, Some(50));
        assert!(config.validate().is_ok());
    }
}
