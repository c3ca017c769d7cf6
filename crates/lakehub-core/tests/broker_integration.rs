//! Broker tests against an in-memory directory and a scripted role assumer

use aws_config::{BehaviorVersion, Region, SdkConfig};
use chrono::Utc;
use lakehub_common::{AccountId, AccountPurpose, AccountType, AssumableAccountSpec, RoleArn};
use lakehub_core::AwsContext;
use lakehub_core::broker::{
    AssumeError, AwsSession, Credentials, CrossAccountSessionBroker, DirectoryError, RoleAssumer,
    StaticAccountDirectory,
};
use lakehub_core::config::{BrokerConfig, ControlPlaneRole};
use lakehub_core::error::{AwsError, classify_aws_error};
use lakehub_core::response::ApiError;
use lakehub_core::retry::{RetrySleeper, SleepFuture};
use lakehub_test_utils::fixtures::{API_ACCOUNT_ID, TestAccounts};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const REGION: &str = "eu-central-1";
const CONTROL_PLANE_ROLE: &str = "arn:aws:iam::111111111111:role/lakehub/api-operator";

#[derive(Debug, Clone, PartialEq)]
struct AssumeCall {
    source_account: String,
    role_arn: String,
}

/// Role assumer returning scripted failures before succeeding
#[derive(Clone, Default)]
struct ScriptedAssumer {
    calls: Arc<Mutex<Vec<AssumeCall>>>,
    failures: Arc<Mutex<VecDeque<AwsError>>>,
}

impl ScriptedAssumer {
    fn failing_with(errors: impl IntoIterator<Item = AwsError>) -> Self {
        let assumer = Self::default();
        assumer.failures.lock().unwrap().extend(errors);
        assumer
    }

    fn calls(&self) -> Vec<AssumeCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl RoleAssumer for ScriptedAssumer {
    async fn assume_role(
        &self,
        source: &AwsSession,
        role_arn: &RoleArn,
        _session_name: &str,
        duration: Duration,
    ) -> Result<Credentials, AwsError> {
        self.calls.lock().unwrap().push(AssumeCall {
            source_account: source.account_id().to_string(),
            role_arn: role_arn.to_string(),
        });
        let failure = self.failures.lock().unwrap().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(Credentials::new(
            "ASIATESTACCESSKEY",
            "test-secret",
            Some("test-token".to_string()),
            Some(Utc::now() + chrono::Duration::from_std(duration).unwrap()),
        ))
    }
}

#[derive(Default)]
struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RetrySleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration) -> SleepFuture<'_> {
        self.delays.lock().unwrap().push(delay);
        Box::pin(async {})
    }
}

fn ambient() -> AwsContext {
    let config = SdkConfig::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(REGION))
        .build();
    AwsContext::from_sdk_config(config, REGION)
}

fn config(control_plane_role: Option<&str>) -> BrokerConfig {
    let mut config = BrokerConfig::new(TestAccounts::environment());
    config.region = REGION.to_string();
    config.control_plane_roles = vec![ControlPlaneRole {
        account_id: AccountId::new(API_ACCOUNT_ID),
        purpose: AccountPurpose::api(),
        role_arn: control_plane_role.map(RoleArn::parse),
    }];
    config
}

fn broker(
    assumer: ScriptedAssumer,
    sleeper: Arc<RecordingSleeper>,
) -> CrossAccountSessionBroker<StaticAccountDirectory, ScriptedAssumer> {
    CrossAccountSessionBroker::new(
        StaticAccountDirectory::new(TestAccounts::all()),
        assumer,
        ambient(),
        config(None),
    )
    .unwrap()
    .with_sleeper(sleeper)
}

fn throttled() -> AwsError {
    classify_aws_error(Some("Throttling"), Some("Rate exceeded"))
}

#[tokio::test]
async fn assumes_metadata_role_from_api_account() {
    let assumer = ScriptedAssumer::default();
    let broker = broker(assumer.clone(), Arc::default());

    let session = broker
        .assume_for_account(&TestAccounts::provider())
        .await
        .unwrap();

    assert_eq!(session.account_id().as_str(), "333333333333");
    assert_eq!(session.region(), REGION);
    assert!(session.credentials().is_some());
    assert_eq!(
        assumer.calls(),
        vec![AssumeCall {
            source_account: API_ACCOUNT_ID.to_string(),
            role_arn: "arn:aws:iam::333333333333:role/lakehub/lakehub-assumable-metadata"
                .to_string(),
        }]
    );
}

#[tokio::test]
async fn sessions_are_cached_per_account_and_region() {
    let assumer = ScriptedAssumer::default();
    let broker = broker(assumer.clone(), Arc::default());
    let spec = AssumableAccountSpec::from_account(&TestAccounts::provider());

    broker.assume(&spec).await.unwrap();
    broker.assume(&spec).await.unwrap();
    assert_eq!(assumer.calls().len(), 1);

    broker.assume_in(&spec, "us-east-1").await.unwrap();
    assert_eq!(assumer.calls().len(), 2);

    broker.invalidate(&spec.account_id, REGION).await;
    broker.assume(&spec).await.unwrap();
    assert_eq!(assumer.calls().len(), 3);
}

#[tokio::test]
async fn technical_accounts_are_unsupported() {
    let assumer = ScriptedAssumer::default();
    let broker = broker(assumer.clone(), Arc::default());
    let spec = AssumableAccountSpec::from_account(&TestAccounts::technical());

    let err = broker.assume(&spec).await.unwrap_err();
    assert!(err.is_unsupported());
    assert_eq!(ApiError::from(&err).status(), 400);

    assert!(broker.assume_lenient(&spec).await.unwrap().is_none());
    assert!(assumer.calls().is_empty());
}

#[tokio::test]
async fn pending_type_update_decides_support() {
    let broker = broker(ScriptedAssumer::default(), Arc::default());
    let spec = AssumableAccountSpec::from_account_with_type(
        &TestAccounts::provider(),
        Some(AccountType::Technical),
    );
    assert!(matches!(
        broker.assume(&spec).await,
        Err(AssumeError::Unsupported(_))
    ));
}

#[tokio::test]
async fn throttling_is_retried_with_sleeps() {
    let assumer = ScriptedAssumer::failing_with([throttled(), throttled()]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let broker = broker(assumer.clone(), sleeper.clone());

    broker
        .assume_for_account(&TestAccounts::provider())
        .await
        .unwrap();

    assert_eq!(assumer.calls().len(), 3);
    assert_eq!(
        *sleeper.delays.lock().unwrap(),
        vec![Duration::from_millis(1000); 2]
    );
}

#[tokio::test]
async fn throttling_past_the_attempt_limit_fails() {
    let assumer = ScriptedAssumer::failing_with([throttled(), throttled(), throttled()]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let broker = broker(assumer.clone(), sleeper.clone());

    let err = broker
        .assume_for_account(&TestAccounts::provider())
        .await
        .unwrap_err();

    assert!(matches!(err, AssumeError::CannotAssumeMetadataRole { .. }));
    assert_eq!(assumer.calls().len(), 3);
    assert_eq!(sleeper.delays.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn access_denied_fails_without_retry() {
    let denied = classify_aws_error(Some("AccessDenied"), Some("not authorized"));
    let assumer = ScriptedAssumer::failing_with([denied]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let broker = broker(assumer.clone(), sleeper.clone());

    let err = broker
        .assume_for_account(&TestAccounts::provider())
        .await
        .unwrap_err();

    let AssumeError::CannotAssumeMetadataRole { role_arn, source } = &err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(role_arn.account_id(), Some(AccountId::new("333333333333")));
    assert_eq!(source.code(), Some("AccessDenied"));
    assert_eq!(assumer.calls().len(), 1);
    assert!(sleeper.delays.lock().unwrap().is_empty());
    assert_eq!(ApiError::from(&err).status(), 500);
}

#[tokio::test]
async fn control_plane_role_is_assumed_first() {
    let assumer = ScriptedAssumer::default();
    let broker = CrossAccountSessionBroker::new(
        StaticAccountDirectory::new(TestAccounts::all()),
        assumer.clone(),
        ambient(),
        config(Some(CONTROL_PLANE_ROLE)),
    )
    .unwrap();

    broker
        .assume_for_account(&TestAccounts::provider())
        .await
        .unwrap();
    broker
        .assume_for_account(&lakehub_test_utils::managed_account(
            "444444444444",
            AccountType::Usecase,
        ))
        .await
        .unwrap();

    let roles: Vec<_> = assumer.calls().into_iter().map(|c| c.role_arn).collect();
    assert_eq!(
        roles,
        vec![
            CONTROL_PLANE_ROLE.to_string(),
            "arn:aws:iam::333333333333:role/lakehub/lakehub-assumable-metadata".to_string(),
            "arn:aws:iam::444444444444:role/lakehub/lakehub-assumable-metadata".to_string(),
        ]
    );
}

#[tokio::test]
async fn missing_api_account_is_a_directory_error() {
    let broker = CrossAccountSessionBroker::new(
        StaticAccountDirectory::new([TestAccounts::provider()]),
        ScriptedAssumer::default(),
        ambient(),
        config(None),
    )
    .unwrap();

    let err = broker
        .assume_for_account(&TestAccounts::provider())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AssumeError::Directory(DirectoryError::AccountNotFound(_))
    ));
}

#[tokio::test]
async fn unconfigured_control_plane_account_is_unknown() {
    let mut config = config(None);
    config.control_plane_roles.clear();
    let broker = CrossAccountSessionBroker::new(
        StaticAccountDirectory::new(TestAccounts::all()),
        ScriptedAssumer::default(),
        ambient(),
        config,
    )
    .unwrap();

    let err = broker
        .assume_for_account(&TestAccounts::provider())
        .await
        .unwrap_err();
    assert!(matches!(err, AssumeError::UnknownAccount { .. }));
}
