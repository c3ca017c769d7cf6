//! Lock identity and lock rows
//!
//! A lock is a row in the shared locks table. Its existence is the lock:
//! there is no lease, heartbeat or expiry on the row itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Placeholder used in lock ids when no stage is given
pub const NO_STAGE: &str = "no_stage";

/// Placeholder used in lock ids when no region is given
pub const NO_REGION: &str = "no_region";

/// Category partitioning the lock namespace
///
/// Two entities in different scopes never share a lock id, even when their
/// item ids are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    Account,
    Dataset,
    S3Resource,
    GlueSyncResource,
    KmsKey,
}

impl LockScope {
    pub const ALL: [LockScope; 5] = [
        LockScope::Account,
        LockScope::Dataset,
        LockScope::S3Resource,
        LockScope::GlueSyncResource,
        LockScope::KmsKey,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LockScope::Account => "account",
            LockScope::Dataset => "dataset",
            LockScope::S3Resource => "s3_resource",
            LockScope::GlueSyncResource => "glue_sync_resource",
            LockScope::KmsKey => "kms_key",
        }
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockScope {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LockScope::ALL
            .into_iter()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "lock scope",
                value: s.to_string(),
            })
    }
}

/// Deployment stage of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Dev,
    Int,
    Prod,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Dev => "dev",
            Stage::Int => "int",
            Stage::Prod => "prod",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Stage::Dev),
            "int" => Ok(Stage::Int),
            "prod" => Ok(Stage::Prod),
            other => Err(UnknownVariant {
                kind: "stage",
                value: other.to_string(),
            }),
        }
    }
}

/// A string did not name any variant of an enum
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Everything that determines a lock's identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub item_id: String,
    pub scope: LockScope,
    pub region: Option<String>,
    pub stage: Option<Stage>,
}

impl LockKey {
    pub fn new(item_id: impl Into<String>, scope: LockScope) -> Self {
        Self {
            item_id: item_id.into(),
            scope,
            region: None,
            stage: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Build the canonical lock id: `{item}_{scope}_{stage}_{region}`
    ///
    /// Missing stage and region are replaced by fixed placeholders so that
    /// keys with different optional parts never map to the same id.
    pub fn lock_id(&self) -> String {
        build_lock_id(
            &self.item_id,
            self.scope,
            self.region.as_deref(),
            self.stage,
        )
    }
}

/// Build the canonical lock id from its parts
pub fn build_lock_id(
    item_id: &str,
    scope: LockScope,
    region: Option<&str>,
    stage: Option<Stage>,
) -> String {
    let stage = stage.map_or(NO_STAGE, Stage::as_str);
    let region = region.unwrap_or(NO_REGION);
    format!("{item_id}_{scope}_{stage}_{region}")
}

/// A lock row as stored in the locks table
///
/// Created by acquiring and destroyed by releasing; never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    pub lock_id: String,
    pub scope: LockScope,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub request_id: String,
}

impl Lock {
    /// Create a lock row for `key`, stamped now
    pub fn new(key: &LockKey, request_id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            lock_id: key.lock_id(),
            scope: key.scope,
            timestamp: Utc::now(),
            data,
            request_id: request_id.into(),
        }
    }

    /// Time elapsed since the lock was taken
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.timestamp)
    }
}
