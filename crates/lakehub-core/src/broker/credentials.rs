//! Temporary credentials and the sessions built from them

use crate::context::AwsContext;
use crate::error::{AwsError, classify_sdk_error};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::provider::SharedCredentialsProvider;
use chrono::{DateTime, Utc};
use lakehub_common::{AccountId, RoleArn};
use std::fmt;
use std::future::Future;
use std::time::{Duration, SystemTime};
use tracing::debug;

const PROVIDER_NAME: &str = "lakehub-broker";

/// Short-lived AWS credentials
///
/// `Debug` never prints the secret parts.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
        expiration: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
            expiration,
        }
    }

    /// Whether these credentials expire before `now + margin`
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        let Some(expiration) = self.expiration else {
            return false;
        };
        match chrono::Duration::from_std(margin) {
            Ok(margin) => expiration <= now + margin,
            Err(_) => true,
        }
    }

    fn to_sdk(&self) -> aws_credential_types::Credentials {
        aws_credential_types::Credentials::new(
            self.access_key_id.clone(),
            self.secret_access_key.clone(),
            self.session_token.clone(),
            self.expiration.map(SystemTime::from),
            PROVIDER_NAME,
        )
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "** redacted **"),
            )
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// An SDK configuration acting as one account in one region
#[derive(Clone)]
pub struct AwsSession {
    account_id: AccountId,
    region: String,
    credentials: Option<Credentials>,
    config: SdkConfig,
}

impl AwsSession {
    /// Session using whatever credentials `aws` was loaded with
    pub fn ambient(aws: &AwsContext, account_id: AccountId) -> Self {
        Self {
            account_id,
            region: aws.region().to_string(),
            credentials: None,
            config: aws.sdk_config().clone(),
        }
    }

    /// Session pinned to explicit credentials
    pub fn from_credentials(account_id: AccountId, credentials: Credentials, region: &str) -> Self {
        let config = SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(SharedCredentialsProvider::new(credentials.to_sdk()))
            .build();
        Self {
            account_id,
            region: region.to_string(),
            credentials: Some(credentials),
            config,
        }
    }

    /// The same identity in another region
    pub fn in_region(&self, region: &str) -> Self {
        match &self.credentials {
            Some(credentials) => {
                Self::from_credentials(self.account_id.clone(), credentials.clone(), region)
            }
            None => Self {
                account_id: self.account_id.clone(),
                region: region.to_string(),
                credentials: None,
                config: self
                    .config
                    .to_builder()
                    .region(Region::new(region.to_string()))
                    .build(),
            },
        }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Explicit credentials, `None` for an ambient session
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.credentials.as_ref().and_then(|c| c.expiration)
    }

    /// Ambient sessions are refreshed by the SDK and never count as expiring
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        self.credentials
            .as_ref()
            .is_some_and(|c| c.expires_within(margin, now))
    }

    pub fn sdk_config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn context(&self) -> AwsContext {
        AwsContext::from_sdk_config(self.config.clone(), &self.region)
    }
}

impl fmt::Debug for AwsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSession")
            .field("account_id", &self.account_id)
            .field("region", &self.region)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

/// Exchanges a source session for credentials of another role
pub trait RoleAssumer: Send + Sync {
    fn assume_role(
        &self,
        source: &AwsSession,
        role_arn: &RoleArn,
        session_name: &str,
        duration: Duration,
    ) -> impl Future<Output = Result<Credentials, AwsError>> + Send;
}

/// [`RoleAssumer`] calling STS AssumeRole
#[derive(Debug, Clone, Copy, Default)]
pub struct StsRoleAssumer;

impl RoleAssumer for StsRoleAssumer {
    async fn assume_role(
        &self,
        source: &AwsSession,
        role_arn: &RoleArn,
        session_name: &str,
        duration: Duration,
    ) -> Result<Credentials, AwsError> {
        let sts = aws_sdk_sts::Client::new(source.sdk_config());
        let duration_secs = i32::try_from(duration.as_secs()).unwrap_or(i32::MAX);

        let response = sts
            .assume_role()
            .role_arn(role_arn.as_str())
            .role_session_name(session_name)
            .duration_seconds(duration_secs)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))?;

        let creds = response.credentials().ok_or_else(|| AwsError::Sdk {
            code: None,
            message: format!("AssumeRole for {role_arn} returned no credentials"),
        })?;

        let expiration = SystemTime::try_from(*creds.expiration())
            .ok()
            .map(DateTime::<Utc>::from);

        debug!(
            role_arn = %role_arn,
            source_account = %source.account_id(),
            expiration = ?expiration,
            "Role assumed"
        );

        Ok(Credentials::new(
            creds.access_key_id(),
            creds.secret_access_key(),
            Some(creds.session_token().to_string()),
            expiration,
        ))
    }
}
