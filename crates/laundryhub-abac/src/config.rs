//! Access control configuration.
//!
//! Configuration for the policy cache, the evaluator, audit delivery and
//! policy reloading. All sections have defaults, so an empty document is a
//! valid configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [cache]
//! timeout = "30s"
//! tenant_attribute = "tenant_id"
//!
//! [evaluator]
//! default_decision = "allow"
//! fail_closed_on_audit_error = true
//! audit_delivery = "inline"
//!
//! [audit]
//! enabled = true
//! include_full_context = false
//!
//! [reload]
//! debounce = "100ms"
//! periodic_refresh = "5m"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::cache::DEFAULT_TENANT_ATTRIBUTE;
use crate::policy::reload::ReloadConfig;

/// Root access control configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AbacConfig {
    /// Policy cache configuration.
    pub cache: CacheConfig,

    /// Evaluator configuration.
    pub evaluator: EvaluatorConfig,

    /// Audit configuration.
    pub audit: AuditConfig,

    /// Policy reload configuration.
    pub reload: ReloadConfig,
}

/// Policy cache configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long fetched policies stay fresh.
    /// `"0s"` refreshes on every evaluation.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Subject attribute holding the tenant identifier.
    pub tenant_attribute: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300), // 5 minutes
            tenant_attribute: DEFAULT_TENANT_ATTRIBUTE.to_string(),
        }
    }
}

impl CacheConfig {
    /// Timeout as a `time::Duration`, saturating on overflow.
    #[must_use]
    pub fn timeout(&self) -> time::Duration {
        time::Duration::try_from(self.timeout).unwrap_or(time::Duration::MAX)
    }
}

/// Evaluator configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Decision when no policy matches.
    pub default_decision: DefaultDecision,

    /// Turn the decision into DENY when an inline audit write fails.
    /// When disabled the computed decision is kept and the audit error is
    /// reported in the decision's `error` field.
    pub fail_closed_on_audit_error: bool,

    /// How audit records are delivered.
    pub audit_delivery: AuditDelivery,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            default_decision: DefaultDecision::Allow,
            fail_closed_on_audit_error: true,
            audit_delivery: AuditDelivery::Inline,
        }
    }
}

/// Default decision when no policy matches the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultDecision {
    /// Allow access unless a policy denies it.
    Allow,
    /// Deny access unless a policy allows it.
    Deny,
}

/// Audit record delivery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditDelivery {
    /// The write is awaited before the decision is returned.
    Inline,
    /// The write runs on a spawned task; failures are only logged.
    Background,
}

/// Audit configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Write an audit record for every evaluation.
    pub enabled: bool,

    /// Include the full request attributes in each record.
    pub include_full_context: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_full_context: false,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// The configuration document could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration file could not be read.
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
}

impl AbacConfig {
    /// Parse a TOML document and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid TOML, does not match
    /// the configuration schema, or fails validation.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or
    /// [`from_toml_str`](Self::from_toml_str) fails.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The tenant attribute is empty
    /// - Reload retries are configured with zero attempts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.tenant_attribute.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "cache.tenant_attribute cannot be empty".to_string(),
            ));
        }

        if self.reload.max_retry_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "reload.max_retry_attempts must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
