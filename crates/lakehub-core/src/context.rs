//! AWS configuration shared by every client of one invocation
//!
//! The SDK config is loaded once per invocation; the lock table and the STS
//! calls of the broker are built from it.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_dynamodb::config::timeout::TimeoutConfig;
use std::sync::Arc;
use std::time::Duration;

/// Loaded SDK configuration plus the region it targets
///
/// # Example
/// ```ignore
/// let aws = AwsContext::new("eu-central-1").await;
///
/// let locks = DynamoLocksTable::from_context(&aws, &config.locks);
/// let broker = CrossAccountSessionBroker::new(directory, StsRoleAssumer, aws.clone(), config.broker)?;
/// ```
#[derive(Clone)]
pub struct AwsContext {
    config: Arc<SdkConfig>,
    region: String,
}

impl AwsContext {
    /// Load the default credential chain for `region`
    pub async fn new(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        Self::from_sdk_config(config, region)
    }

    /// Load credentials from a named profile, for local runs
    pub async fn with_profile(region: &str, profile: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .profile_name(profile)
            .load()
            .await;

        Self::from_sdk_config(config, region)
    }

    /// Wrap an already loaded config, e.g. one carrying assumed credentials.
    pub fn from_sdk_config(config: SdkConfig, region: &str) -> Self {
        Self {
            config: Arc::new(config),
            region: region.to_string(),
        }
    }

    /// The SDK config, for building clients directly
    pub fn sdk_config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// STS client acting with the ambient credentials
    pub fn sts_client(&self) -> aws_sdk_sts::Client {
        aws_sdk_sts::Client::new(self.sdk_config())
    }

    /// DynamoDB client for the lock table
    ///
    /// Everything is inherited from the shared config; `endpoint`
    /// points it at a local emulator and `timeout` bounds each operation.
    pub fn dynamodb_client(
        &self,
        endpoint: Option<&str>,
        timeout: Option<Duration>,
    ) -> aws_sdk_dynamodb::Client {
        let mut builder = aws_sdk_dynamodb::config::Builder::from(self.sdk_config());

        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if let Some(timeout) = timeout {
            let timeout_config = TimeoutConfig::builder()
                .operation_timeout(timeout)
                .build();
            builder = builder.timeout_config(timeout_config);
        }

        aws_sdk_dynamodb::Client::from_conf(builder.build())
    }
}

impl std::fmt::Debug for AwsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsContext")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}
