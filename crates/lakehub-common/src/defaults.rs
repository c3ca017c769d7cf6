//! Default configuration values shared across lakehub components
//!
//! Durations are stored as seconds so they can be used directly as serde
//! field defaults.

/// Name of the locks table, appended to the configured prefix
pub const LOCKS_TABLE_SUFFIX: &str = "lakehub-locks";

/// Hash key attribute of the locks table
pub const LOCKS_TABLE_HASH_KEY: &str = "lock_id";

/// Age after which a held lock is reported as stale (15 minutes)
pub const DEFAULT_LOCK_STALE_AFTER_SECS: u64 = 900;

/// Operation timeout for lock store calls
pub const DEFAULT_LOCK_STORE_TIMEOUT_SECS: u64 = 10;

/// IAM path of the metadata role in every managed account
pub const DEFAULT_METADATA_ROLE_PATH: &str = "/lakehub/";

/// Name of the metadata role in every managed account
pub const DEFAULT_METADATA_ROLE_NAME: &str = "lakehub-assumable-metadata";

/// Session name used when assuming metadata roles
pub const DEFAULT_ROLE_SESSION_NAME: &str = "MetadataRoleAssumer";

/// Requested lifetime of assumed credentials (1 hour)
pub const DEFAULT_ASSUME_DURATION_SECS: u64 = 3600;

/// Maximum number of cached assumed sessions
pub const DEFAULT_SESSION_CACHE_CAPACITY: u64 = 1024;

/// Upper bound on how long an assumed session stays cached
pub const DEFAULT_SESSION_CACHE_TTL_SECS: u64 = 3000;

/// Cached sessions expiring within this margin are treated as misses
pub const DEFAULT_SESSION_EXPIRY_MARGIN_SECS: u64 = 300;

/// Total attempts for throttled role assumption
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Fixed wait between retry attempts, in milliseconds
pub const DEFAULT_RETRY_WAIT_MS: u64 = 1000;

/// Region used when none is configured
pub const DEFAULT_REGION: &str = "eu-central-1";

/// Fraction of a policy size limit above which a warning is logged
pub const POLICY_SIZE_WARN_RATIO: f64 = 0.95;

// Serde default functions for struct field defaults

pub fn default_lock_stale_after_secs() -> u64 {
    DEFAULT_LOCK_STALE_AFTER_SECS
}

pub fn default_lock_store_timeout_secs() -> u64 {
    DEFAULT_LOCK_STORE_TIMEOUT_SECS
}

pub fn default_metadata_role_path() -> String {
    DEFAULT_METADATA_ROLE_PATH.to_string()
}

pub fn default_metadata_role_name() -> String {
    DEFAULT_METADATA_ROLE_NAME.to_string()
}

pub fn default_role_session_name() -> String {
    DEFAULT_ROLE_SESSION_NAME.to_string()
}

pub fn default_assume_duration_secs() -> u64 {
    DEFAULT_ASSUME_DURATION_SECS
}

pub fn default_session_cache_capacity() -> u64 {
    DEFAULT_SESSION_CACHE_CAPACITY
}

pub fn default_session_cache_ttl_secs() -> u64 {
    DEFAULT_SESSION_CACHE_TTL_SECS
}

pub fn default_session_expiry_margin_secs() -> u64 {
    DEFAULT_SESSION_EXPIRY_MARGIN_SECS
}

pub fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

pub fn default_retry_wait_ms() -> u64 {
    DEFAULT_RETRY_WAIT_MS
}

pub fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

/// Full locks table name for a deployment prefix
pub fn locks_table_name(prefix: &str) -> String {
    format!("{prefix}{LOCKS_TABLE_SUFFIX}")
}
