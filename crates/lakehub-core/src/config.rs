//! Configuration loading from JSON and the environment

use crate::error::THROTTLING_CODES;
use crate::logging::LogFormat;
use crate::retry::{RetryConfigError, RetryOn, RetryPolicy};
use lakehub_common::defaults::{
    self, default_assume_duration_secs, default_lock_stale_after_secs,
    default_lock_store_timeout_secs, default_metadata_role_name, default_metadata_role_path,
    default_region, default_retry_attempts, default_retry_wait_ms, default_role_session_name,
    default_session_cache_capacity, default_session_cache_ttl_secs,
    default_session_expiry_margin_secs,
};
use lakehub_common::{AccountId, AccountPurpose, Environment, RoleArn};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// STS accepts session durations between 15 minutes and 12 hours
const ASSUME_DURATION_RANGE: std::ops::RangeInclusive<u64> = 900..=43200;

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("locks.timeout_secs must be greater than 0")]
    InvalidLockTimeout,

    #[error("locks.stale_after_secs must be greater than 0")]
    InvalidStaleAfter,

    #[error("broker.environment cannot be empty")]
    EmptyEnvironment,

    #[error("broker.region cannot be empty")]
    EmptyRegion,

    #[error("broker.metadata_role_path must start and end with '/', got: {0}")]
    InvalidRolePath(String),

    #[error("broker.metadata_role_name cannot be empty")]
    EmptyRoleName,

    #[error("broker.session_name cannot be empty")]
    EmptySessionName,

    #[error("broker.assume_duration_secs must be within 900..=43200, got {0}")]
    InvalidAssumeDuration(u64),

    #[error("broker.cache_capacity must be at least 1")]
    InvalidCacheCapacity,

    #[error("broker.expiry_margin_secs ({margin}) must be below assume_duration_secs ({duration})")]
    InvalidExpiryMargin { margin: u64, duration: u64 },

    #[error("invalid retry settings: {0}")]
    Retry(#[from] RetryConfigError),

    #[error("environment variable {var} has invalid value '{value}'")]
    InvalidEnv { var: &'static str, value: String },

    /// Failed to parse JSON configuration
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// Failed to read configuration file
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Create an IO error with path context
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Lock store settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    /// Prepended to the table name, e.g. `dev-`
    #[serde(default)]
    pub table_prefix: String,

    /// Endpoint override (e.g. a local DynamoDB)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Per-operation timeout against the store
    #[serde(default = "default_lock_store_timeout_secs")]
    pub timeout_secs: u64,

    /// Age after which a held lock is reported as stale
    #[serde(default = "default_lock_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            table_prefix: String::new(),
            endpoint: None,
            timeout_secs: default_lock_store_timeout_secs(),
            stale_after_secs: default_lock_stale_after_secs(),
        }
    }
}

impl LockConfig {
    pub fn table_name(&self) -> String {
        defaults::locks_table_name(&self.table_prefix)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// Role the control plane assumes to act as one of its own accounts
///
/// A missing `role_arn` means the ambient credentials already belong to
/// that account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlPlaneRole {
    pub account_id: AccountId,
    pub purpose: AccountPurpose,
    #[serde(default)]
    pub role_arn: Option<RoleArn>,
}

/// Cross-account session broker settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// Environment the control plane runs in; selects its api account
    pub environment: Environment,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_metadata_role_path")]
    pub metadata_role_path: String,

    #[serde(default = "default_metadata_role_name")]
    pub metadata_role_name: String,

    #[serde(default = "default_role_session_name")]
    pub session_name: String,

    #[serde(default = "default_assume_duration_secs")]
    pub assume_duration_secs: u64,

    #[serde(default = "default_session_cache_capacity")]
    pub cache_capacity: u64,

    #[serde(default = "default_session_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Cached sessions closer than this to expiry are refreshed
    #[serde(default = "default_session_expiry_margin_secs")]
    pub expiry_margin_secs: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_wait_ms")]
    pub retry_wait_ms: u64,

    /// Control-plane accounts and the roles used to act as them
    #[serde(default)]
    pub control_plane_roles: Vec<ControlPlaneRole>,
}

impl BrokerConfig {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            region: default_region(),
            metadata_role_path: default_metadata_role_path(),
            metadata_role_name: default_metadata_role_name(),
            session_name: default_role_session_name(),
            assume_duration_secs: default_assume_duration_secs(),
            cache_capacity: default_session_cache_capacity(),
            cache_ttl_secs: default_session_cache_ttl_secs(),
            expiry_margin_secs: default_session_expiry_margin_secs(),
            retry_attempts: default_retry_attempts(),
            retry_wait_ms: default_retry_wait_ms(),
            control_plane_roles: Vec::new(),
        }
    }

    pub fn assume_duration(&self) -> Duration {
        Duration::from_secs(self.assume_duration_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn expiry_margin(&self) -> Duration {
        Duration::from_secs(self.expiry_margin_secs)
    }

    /// Retry policy for role assumption: throttling only
    pub fn retry_policy(&self) -> Result<RetryPolicy, RetryConfigError> {
        Ok(
            RetryPolicy::new(self.retry_attempts, Duration::from_millis(self.retry_wait_ms))?
                .with_codes(RetryOn::only(THROTTLING_CODES.iter().copied())),
        )
    }
}

/// Logging settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

/// Complete configuration of the core services
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    #[serde(default)]
    pub locks: LockConfig,

    pub broker: BrokerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CoreConfig {
    /// Defaults for every setting except the environment
    pub fn new(environment: Environment) -> Self {
        Self {
            locks: LockConfig::default(),
            broker: BrokerConfig::new(environment),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::io(path.display().to_string(), e))?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from JSON text
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from `LAKEHUB_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build configuration from a variable lookup, falling back to defaults
    ///
    /// `LAKEHUB_ENVIRONMENT` is the only required variable.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("LAKEHUB_ENVIRONMENT").ok_or(ConfigError::EmptyEnvironment)?;
        let mut config = Self::new(Environment::new(environment));

        if let Some(v) = lookup("LAKEHUB_LOCKS_TABLE_PREFIX") {
            config.locks.table_prefix = v;
        }
        if let Some(v) = lookup("LAKEHUB_LOCKS_ENDPOINT") {
            config.locks.endpoint = Some(v);
        }
        if let Some(v) = lookup("LAKEHUB_LOCKS_TIMEOUT_SECS") {
            config.locks.timeout_secs = parse_var("LAKEHUB_LOCKS_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("LAKEHUB_LOCKS_STALE_AFTER_SECS") {
            config.locks.stale_after_secs = parse_var("LAKEHUB_LOCKS_STALE_AFTER_SECS", v)?;
        }
        if let Some(v) = lookup("LAKEHUB_REGION") {
            config.broker.region = v;
        }
        if let Some(v) = lookup("LAKEHUB_METADATA_ROLE_PATH") {
            config.broker.metadata_role_path = v;
        }
        if let Some(v) = lookup("LAKEHUB_METADATA_ROLE_NAME") {
            config.broker.metadata_role_name = v;
        }
        if let Some(v) = lookup("LAKEHUB_ASSUME_DURATION_SECS") {
            config.broker.assume_duration_secs = parse_var("LAKEHUB_ASSUME_DURATION_SECS", v)?;
        }
        if let Some(v) = lookup("LAKEHUB_RETRY_ATTEMPTS") {
            config.broker.retry_attempts = parse_var("LAKEHUB_RETRY_ATTEMPTS", v)?;
        }
        if let Some(v) = lookup("LAKEHUB_RETRY_WAIT_MS") {
            config.broker.retry_wait_ms = parse_var("LAKEHUB_RETRY_WAIT_MS", v)?;
        }
        if let Some(v) = lookup("LAKEHUB_LOG_FORMAT") {
            config.logging.format = parse_var("LAKEHUB_LOG_FORMAT", v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let locks = &self.locks;
        if locks.timeout_secs == 0 {
            return Err(ConfigError::InvalidLockTimeout);
        }
        if locks.stale_after_secs == 0 {
            return Err(ConfigError::InvalidStaleAfter);
        }

        let broker = &self.broker;
        if broker.environment.as_str().is_empty() {
            return Err(ConfigError::EmptyEnvironment);
        }
        if broker.region.is_empty() {
            return Err(ConfigError::EmptyRegion);
        }
        let path = &broker.metadata_role_path;
        if !path.starts_with('/') || !path.ends_with('/') {
            return Err(ConfigError::InvalidRolePath(path.clone()));
        }
        if broker.metadata_role_name.is_empty() {
            return Err(ConfigError::EmptyRoleName);
        }
        if broker.session_name.is_empty() {
            return Err(ConfigError::EmptySessionName);
        }
        if !ASSUME_DURATION_RANGE.contains(&broker.assume_duration_secs) {
            return Err(ConfigError::InvalidAssumeDuration(
                broker.assume_duration_secs,
            ));
        }
        if broker.cache_capacity == 0 {
            return Err(ConfigError::InvalidCacheCapacity);
        }
        if broker.expiry_margin_secs >= broker.assume_duration_secs {
            return Err(ConfigError::InvalidExpiryMargin {
                margin: broker.expiry_margin_secs,
                duration: broker.assume_duration_secs,
            });
        }
        broker.retry_policy()?;

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_load_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{
                "locks": {{ "table_prefix": "dev-", "stale_after_secs": 60 }},
                "broker": {{
                    "environment": "dev",
                    "control_plane_roles": [
                        {{ "account_id": "111122223333", "purpose": "api" }}
                    ]
                }},
                "logging": {{ "format": "json" }}
            }}"#
        )
        .unwrap();

        let config = CoreConfig::load(file.path()).unwrap();
        assert_eq!(config.locks.table_name(), "dev-lakehub-locks");
        assert_eq!(config.locks.stale_after(), Duration::from_secs(60));
        assert_eq!(config.locks.timeout_secs, defaults::DEFAULT_LOCK_STORE_TIMEOUT_SECS);
        assert_eq!(config.broker.environment.as_str(), "dev");
        assert_eq!(config.broker.metadata_role_path, "/lakehub/");
        assert_eq!(config.broker.control_plane_roles.len(), 1);
        assert!(config.broker.control_plane_roles[0].role_arn.is_none());
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_missing_file() {
        let err = CoreConfig::load(Path::new("/nonexistent/lakehub.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/lakehub.json"));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = CoreConfig::from_json(r#"{"broker": {"environment": "dev"}, "extra": 1}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = CoreConfig::new(Environment::new("prod"));
        assert!(config.validate().is_ok());

        config.broker.metadata_role_path = "lakehub".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRolePath(p)) if p == "lakehub"
        ));

        let mut config = CoreConfig::new(Environment::new("prod"));
        config.broker.assume_duration_secs = 60;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAssumeDuration(60))
        ));

        let mut config = CoreConfig::new(Environment::new("prod"));
        config.broker.retry_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Retry(RetryConfigError::InvalidAttempts(0)))
        ));

        let mut config = CoreConfig::new(Environment::new("prod"));
        config.broker.expiry_margin_secs = config.broker.assume_duration_secs;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidExpiryMargin { .. })
        ));

        let config = CoreConfig::new(Environment::new(""));
        assert!(matches!(config.validate(), Err(ConfigError::EmptyEnvironment)));
    }

    #[test]
    fn test_from_vars_overlays_defaults() {
        let config = CoreConfig::from_vars(vars(&[
            ("LAKEHUB_ENVIRONMENT", "int"),
            ("LAKEHUB_LOCKS_TABLE_PREFIX", "int-"),
            ("LAKEHUB_RETRY_ATTEMPTS", "5"),
            ("LAKEHUB_LOG_FORMAT", "json"),
        ]))
        .unwrap();

        assert_eq!(config.broker.environment.as_str(), "int");
        assert_eq!(config.locks.table_name(), "int-lakehub-locks");
        assert_eq!(config.broker.retry_attempts, 5);
        assert_eq!(config.broker.region, defaults::DEFAULT_REGION);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_from_vars_rejects_bad_values() {
        let err = CoreConfig::from_vars(vars(&[
            ("LAKEHUB_ENVIRONMENT", "int"),
            ("LAKEHUB_LOCKS_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv { var: "LAKEHUB_LOCKS_TIMEOUT_SECS", .. }
        ));

        assert!(matches!(
            CoreConfig::from_vars(vars(&[])),
            Err(ConfigError::EmptyEnvironment)
        ));
    }

    #[test]
    fn test_broker_retry_policy_is_throttling_only() {
        let config = CoreConfig::new(Environment::new("dev"));
        let policy = config.broker.retry_policy().unwrap();
        assert_eq!(policy.num_attempts(), defaults::DEFAULT_RETRY_ATTEMPTS);
        assert!(policy.should_retry(&crate::error::classify_aws_error(
            Some("Throttling"),
            None
        )));
        assert!(!policy.should_retry(&crate::error::classify_aws_error(
            Some("AccessDenied"),
            None
        )));
    }
}
