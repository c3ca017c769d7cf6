//! Fixed-backoff retry of transient failures
//!
//! A [`RetryPolicy`] says which failures are transient and how often to try.
//! Binding it to an owner with [`RetryPolicy::decorate`] resolves the owner's
//! sleeper once and yields a [`RetryDecorator`] that runs operations under the
//! policy. Tests swap the owner's sleeper for one that records delays instead
//! of waiting.

use crate::error::{AwsError, TransportKind};
use backon::{ConstantBuilder, Retryable};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Boxed future returned by [`RetrySleeper::sleep`]
pub type SleepFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Waits between retry attempts
pub trait RetrySleeper: Send + Sync {
    fn sleep(&self, delay: Duration) -> SleepFuture<'_>;
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl RetrySleeper for TokioSleeper {
    fn sleep(&self, delay: Duration) -> SleepFuture<'_> {
        Box::pin(tokio::time::sleep(delay))
    }
}

/// Implemented by components whose operations can be retried
///
/// The sleeper is resolved from the owning instance, so a decorator can only
/// be built for something that has one.
pub trait HasSleeper {
    fn sleeper(&self) -> Arc<dyn RetrySleeper>;
}

/// What kind of failure an error represents, as seen by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass<'a> {
    /// A service answered with this error code
    Service(&'a str),
    /// No service response was received
    Transport(TransportKind),
    /// Anything else; never retried
    Other,
}

/// Errors that can be matched against a retry policy
pub trait RetryClass {
    fn failure_class(&self) -> FailureClass<'_>;
}

impl RetryClass for AwsError {
    fn failure_class(&self) -> FailureClass<'_> {
        match self {
            AwsError::Transport { kind, .. } => FailureClass::Transport(*kind),
            other => other
                .code()
                .map_or(FailureClass::Other, FailureClass::Service),
        }
    }
}

/// Invalid retry policy parameters
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetryConfigError {
    #[error("num_attempts must be at least 1, got {0}")]
    InvalidAttempts(u32),

    #[error("wait must be a non-negative number of seconds, got {0}")]
    InvalidWait(f64),
}

/// Service error codes a policy retries on
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RetryOn {
    /// Every service error code
    #[default]
    All,
    /// Only the listed codes
    Only(Vec<String>),
}

impl RetryOn {
    pub fn only<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RetryOn::Only(codes.into_iter().map(Into::into).collect())
    }

    fn contains(&self, code: &str) -> bool {
        match self {
            RetryOn::All => true,
            RetryOn::Only(codes) => codes.iter().any(|c| c == code),
        }
    }
}

/// Which failures to retry, how many times, and how long to wait in between
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    num_attempts: u32,
    wait: Duration,
    retryable_codes: RetryOn,
    retryable_transport: Vec<TransportKind>,
}

impl RetryPolicy {
    /// A policy retrying every service error code and no transport failure
    ///
    /// `num_attempts` counts the first call, so `1` means no retry at all.
    pub fn new(num_attempts: u32, wait: Duration) -> Result<Self, RetryConfigError> {
        if num_attempts < 1 {
            return Err(RetryConfigError::InvalidAttempts(num_attempts));
        }
        Ok(Self {
            num_attempts,
            wait,
            retryable_codes: RetryOn::All,
            retryable_transport: Vec::new(),
        })
    }

    /// Like [`RetryPolicy::new`] with the wait given in (possibly fractional) seconds
    pub fn from_secs_f64(num_attempts: u32, wait_secs: f64) -> Result<Self, RetryConfigError> {
        if !wait_secs.is_finite() || wait_secs < 0.0 {
            return Err(RetryConfigError::InvalidWait(wait_secs));
        }
        Self::new(num_attempts, Duration::from_secs_f64(wait_secs))
    }

    pub fn with_codes(mut self, codes: RetryOn) -> Self {
        self.retryable_codes = codes;
        self
    }

    pub fn with_transport(mut self, kinds: impl IntoIterator<Item = TransportKind>) -> Self {
        self.retryable_transport = kinds.into_iter().collect();
        self
    }

    pub fn num_attempts(&self) -> u32 {
        self.num_attempts
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Whether `err` belongs to one of the retryable classes
    pub fn should_retry<E: RetryClass + ?Sized>(&self, err: &E) -> bool {
        match err.failure_class() {
            FailureClass::Service(code) => self.retryable_codes.contains(code),
            FailureClass::Transport(kind) => self.retryable_transport.contains(&kind),
            FailureClass::Other => false,
        }
    }

    /// Bind this policy to `owner`, resolving the owner's sleeper
    pub fn decorate<S: HasSleeper + ?Sized>(&self, owner: &S) -> RetryDecorator {
        RetryDecorator {
            policy: self.clone(),
            sleeper: owner.sleeper(),
        }
    }
}

/// A retry policy bound to a sleeper
#[derive(Clone)]
pub struct RetryDecorator {
    policy: RetryPolicy,
    sleeper: Arc<dyn RetrySleeper>,
}

impl RetryDecorator {
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` under the policy
    ///
    /// Matching failures are retried after the fixed wait until the attempts
    /// are used up; the last failure is returned without a further sleep.
    /// Non-matching failures are returned straight away.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryClass + fmt::Display,
    {
        let backoff = ConstantBuilder::default()
            .with_delay(self.policy.wait)
            .with_max_times(self.policy.num_attempts.saturating_sub(1) as usize);

        let sleeper = Arc::clone(&self.sleeper);

        op.retry(backoff)
            .sleep(move |delay| {
                let sleeper = Arc::clone(&sleeper);
                async move { sleeper.sleep(delay).await }
            })
            .when(|e| self.policy.should_retry(e))
            .notify(|e, delay| {
                warn!(
                    operation,
                    delay = ?delay,
                    error = %e,
                    "Transient failure, retrying..."
                );
            })
            .await
    }
}

impl fmt::Debug for RetryDecorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryDecorator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify_aws_error;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

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

    struct Owner {
        sleeper: Arc<RecordingSleeper>,
    }

    impl HasSleeper for Owner {
        fn sleeper(&self) -> Arc<dyn RetrySleeper> {
            self.sleeper.clone()
        }
    }

    fn owner() -> Owner {
        Owner {
            sleeper: Arc::new(RecordingSleeper::default()),
        }
    }

    fn throttled() -> AwsError {
        classify_aws_error(Some("ThrottlingException"), Some("slow down"))
    }

    fn timeout() -> AwsError {
        AwsError::Transport {
            kind: TransportKind::Timeout,
            message: "timed out".into(),
        }
    }

    #[tokio::test]
    async fn fails_n_minus_one_times_then_succeeds() {
        let owner = owner();
        let policy = RetryPolicy::new(4, Duration::from_millis(250)).unwrap();
        let calls = AtomicU32::new(0);

        let result: Result<&str, AwsError> = policy
            .decorate(&owner)
            .run("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(throttled())
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            *owner.sleeper.delays.lock().unwrap(),
            vec![Duration::from_millis(250); 3]
        );
    }

    #[tokio::test]
    async fn last_attempt_fails_without_sleeping() {
        let owner = owner();
        let policy = RetryPolicy::new(3, Duration::from_secs(1)).unwrap();
        let calls = AtomicU32::new(0);

        let result: Result<(), AwsError> = policy
            .decorate(&owner)
            .run("always_throttled", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(throttled())
            })
            .await;

        assert!(matches!(result, Err(AwsError::Throttled { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(owner.sleeper.delays.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn non_matching_error_propagates_immediately() {
        let owner = owner();
        let policy = RetryPolicy::new(5, Duration::from_secs(1))
            .unwrap()
            .with_codes(RetryOn::only(["ThrottlingException"]));
        let calls = AtomicU32::new(0);

        let result: Result<(), AwsError> = policy
            .decorate(&owner)
            .run("denied", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(classify_aws_error(Some("AccessDenied"), Some("no")))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(owner.sleeper.delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn single_attempt_never_sleeps() {
        let owner = owner();
        let policy = RetryPolicy::new(1, Duration::from_secs(1)).unwrap();

        let result: Result<(), AwsError> = policy
            .decorate(&owner)
            .run("once", || async { Err(throttled()) })
            .await;

        assert!(result.is_err());
        assert!(owner.sleeper.delays.lock().unwrap().is_empty());
    }

    #[test]
    fn transport_failures_need_opt_in() {
        let default_policy = RetryPolicy::new(3, Duration::ZERO).unwrap();
        assert!(!default_policy.should_retry(&timeout()));
        assert!(default_policy.should_retry(&throttled()));

        let with_timeouts = default_policy.with_transport([TransportKind::Timeout]);
        assert!(with_timeouts.should_retry(&timeout()));
        assert!(!with_timeouts.should_retry(&AwsError::Transport {
            kind: TransportKind::Dispatch,
            message: "refused".into(),
        }));
    }

    #[test]
    fn errors_without_code_are_never_retried() {
        let policy = RetryPolicy::new(3, Duration::ZERO).unwrap();
        assert!(!policy.should_retry(&classify_aws_error(None, Some("?"))));
    }

    #[test]
    fn policy_validation() {
        assert_eq!(
            RetryPolicy::new(0, Duration::ZERO),
            Err(RetryConfigError::InvalidAttempts(0))
        );
        assert_eq!(
            RetryPolicy::from_secs_f64(3, -0.5),
            Err(RetryConfigError::InvalidWait(-0.5))
        );
        assert!(RetryPolicy::from_secs_f64(3, f64::NAN).is_err());
        let ok = RetryPolicy::from_secs_f64(2, 0.5).unwrap();
        assert_eq!(ok.wait(), Duration::from_millis(500));
        assert_eq!(ok.num_attempts(), 2);
    }
}
