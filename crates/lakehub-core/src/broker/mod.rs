//! Cross-account session broker
//!
//! Resolves the metadata role of a managed account and assumes it from the
//! control plane's own api account. Outcomes are one of:
//!
//! - a session for the target account,
//! - [`AssumeError::Unsupported`] when the account type has no metadata role,
//! - any other [`AssumeError`] when the assumption failed.
//!
//! Only the successful path retries, and only on throttling.

mod cache;
mod credentials;
mod directory;

pub use cache::SessionCache;
pub use credentials::{AwsSession, Credentials, RoleAssumer, StsRoleAssumer};
pub use directory::{AccountDirectory, DirectoryError, StaticAccountDirectory};

use crate::config::{BrokerConfig, ConfigError};
use crate::context::AwsContext;
use crate::error::AwsError;
use crate::retry::{HasSleeper, RetryPolicy, RetrySleeper, TokioSleeper};
use chrono::Utc;
use lakehub_common::{Account, AccountId, AccountPurpose, AssumableAccountSpec, RoleArn};
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// Role assumption errors
#[derive(Debug, Error)]
pub enum AssumeError {
    /// The account type has no metadata role; not a failure of the call
    #[error("Cannot assume metadata role for {0}: account type has no metadata role")]
    Unsupported(AssumableAccountSpec),

    #[error("Cannot assume metadata role {role_arn}")]
    CannotAssumeMetadataRole {
        role_arn: RoleArn,
        #[source]
        source: AwsError,
    },

    #[error("Cannot assume control-plane role {role_arn}")]
    ControlPlaneRole {
        role_arn: RoleArn,
        #[source]
        source: AwsError,
    },

    /// No control-plane role is configured for this account and purpose
    #[error("Unknown control-plane account {account_id} with purpose {purpose}")]
    UnknownAccount {
        account_id: AccountId,
        purpose: AccountPurpose,
    },

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl AssumeError {
    pub fn is_unsupported(&self) -> bool {
        matches!(self, AssumeError::Unsupported(_))
    }
}

type ControlPlaneKey = (AccountId, AccountPurpose);

/// Hands out sessions scoped to managed accounts
pub struct CrossAccountSessionBroker<D, A = StsRoleAssumer> {
    directory: D,
    assumer: A,
    ambient: AwsContext,
    config: BrokerConfig,
    retry_policy: RetryPolicy,
    control_plane_roles: HashMap<ControlPlaneKey, Option<RoleArn>>,
    control_plane_sessions: Cache<ControlPlaneKey, AwsSession>,
    sessions: SessionCache,
    sleeper: Arc<dyn RetrySleeper>,
}

impl<D: AccountDirectory, A: RoleAssumer> CrossAccountSessionBroker<D, A> {
    /// Build a broker acting from the credentials in `ambient`
    pub fn new(
        directory: D,
        assumer: A,
        ambient: AwsContext,
        config: BrokerConfig,
    ) -> Result<Self, ConfigError> {
        let retry_policy = config.retry_policy()?;
        let control_plane_roles = config
            .control_plane_roles
            .iter()
            .map(|r| ((r.account_id.clone(), r.purpose.clone()), r.role_arn.clone()))
            .collect();
        let control_plane_sessions = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl())
            .build();

        Ok(Self {
            directory,
            assumer,
            ambient,
            sessions: SessionCache::from_config(&config),
            retry_policy,
            control_plane_roles,
            control_plane_sessions,
            config,
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Replace the sleeper used between retries
    pub fn with_sleeper(mut self, sleeper: Arc<dyn RetrySleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Metadata role of `spec`'s account
    pub fn metadata_role_arn(&self, spec: &AssumableAccountSpec) -> RoleArn {
        RoleArn::new(
            &spec.hub.partition,
            &spec.account_id,
            &self.config.metadata_role_path,
            &self.config.metadata_role_name,
        )
    }

    /// Session for `spec`'s account in the default region
    pub async fn assume(&self, spec: &AssumableAccountSpec) -> Result<AwsSession, AssumeError> {
        self.assume_in(spec, &self.config.region).await
    }

    pub async fn assume_for_account(&self, account: &Account) -> Result<AwsSession, AssumeError> {
        self.assume(&AssumableAccountSpec::from_account(account))
            .await
    }

    /// Like [`assume`](Self::assume), with accounts lacking a metadata role
    /// mapped to `None`
    pub async fn assume_lenient(
        &self,
        spec: &AssumableAccountSpec,
    ) -> Result<Option<AwsSession>, AssumeError> {
        match self.assume(spec).await {
            Ok(session) => Ok(Some(session)),
            Err(AssumeError::Unsupported(spec)) => {
                info!(account = %spec, "Skipping account without metadata role");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Session for `spec`'s account in `region`
    pub async fn assume_in(
        &self,
        spec: &AssumableAccountSpec,
        region: &str,
    ) -> Result<AwsSession, AssumeError> {
        if !spec.supports_metadata_role() {
            return Err(AssumeError::Unsupported(spec.clone()));
        }

        if let Some(session) = self.sessions.get(&spec.account_id, region).await {
            debug!(account_id = %spec.account_id, region, "Using cached session");
            return Ok(session);
        }

        let api_account = self
            .directory
            .query_account(
                &self.config.environment,
                &AccountPurpose::api(),
                &spec.hub.partition,
            )
            .await?;
        let source = self.control_plane_session(&api_account).await?;

        let role_arn = self.metadata_role_arn(spec);
        let credentials = self
            .assume_with_retry(&source, &role_arn)
            .await
            .map_err(|source| {
                error!(
                    account = %spec,
                    role_arn = %role_arn,
                    error = %source,
                    "Failed to assume metadata role"
                );
                AssumeError::CannotAssumeMetadataRole {
                    role_arn: role_arn.clone(),
                    source,
                }
            })?;

        let session = AwsSession::from_credentials(spec.account_id.clone(), credentials, region);
        self.sessions.insert(session.clone()).await;
        info!(
            account_id = %spec.account_id,
            role_arn = %role_arn,
            region,
            "Assumed metadata role"
        );
        Ok(session)
    }

    /// Drop the cached session for one account and region
    pub async fn invalidate(&self, account_id: &AccountId, region: &str) {
        self.sessions.invalidate(account_id, region).await;
    }

    /// Drop every cached session, including control-plane ones
    pub fn invalidate_all(&self) {
        self.sessions.invalidate_all();
        self.control_plane_sessions.invalidate_all();
    }

    /// Session acting as one of the control plane's own accounts
    async fn control_plane_session(&self, account: &Account) -> Result<AwsSession, AssumeError> {
        let key = (account.id.clone(), account.purpose.clone());

        if let Some(session) = self.control_plane_sessions.get(&key).await {
            if !session.expires_within(self.config.expiry_margin(), Utc::now()) {
                return Ok(session);
            }
            self.control_plane_sessions.invalidate(&key).await;
        }

        let role_arn = self
            .control_plane_roles
            .get(&key)
            .ok_or_else(|| AssumeError::UnknownAccount {
                account_id: account.id.clone(),
                purpose: account.purpose.clone(),
            })?;

        let ambient = AwsSession::ambient(&self.ambient, account.id.clone());
        let session = match role_arn {
            None => ambient,
            Some(role_arn) => {
                let credentials = self
                    .assume_with_retry(&ambient, role_arn)
                    .await
                    .map_err(|source| AssumeError::ControlPlaneRole {
                        role_arn: role_arn.clone(),
                        source,
                    })?;
                debug!(account_id = %account.id, role_arn = %role_arn, "Assumed control-plane role");
                AwsSession::from_credentials(account.id.clone(), credentials, self.ambient.region())
            }
        };

        self.control_plane_sessions
            .insert(key, session.clone())
            .await;
        Ok(session)
    }

    async fn assume_with_retry(
        &self,
        source: &AwsSession,
        role_arn: &RoleArn,
    ) -> Result<Credentials, AwsError> {
        let assumer = &self.assumer;
        let session_name = self.config.session_name.as_str();
        let duration = self.config.assume_duration();

        self.retry_policy
            .decorate(self)
            .run("assume_role", move || {
                assumer.assume_role(source, role_arn, session_name, duration)
            })
            .await
    }
}

impl<D, A> HasSleeper for CrossAccountSessionBroker<D, A> {
    fn sleeper(&self) -> Arc<dyn RetrySleeper> {
        Arc::clone(&self.sleeper)
    }
}

impl<D, A> std::fmt::Debug for CrossAccountSessionBroker<D, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossAccountSessionBroker")
            .field("environment", &self.config.environment)
            .field("region", &self.config.region)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}
