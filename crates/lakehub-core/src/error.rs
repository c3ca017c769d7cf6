//! AWS error classification
//!
//! Typed errors for AWS SDK operations, built from the error code exposed by
//! `ProvideErrorMetadata` rather than by string matching on Debug output.

use aws_sdk_sts::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use std::fmt;
use thiserror::Error;

/// How a request failed before a service response could be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Connect, read or operation timeout
    Timeout,
    /// The request could not be sent (DNS, TLS, connection refused)
    Dispatch,
    /// A response arrived but could not be parsed
    Response,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Timeout => "timeout",
            TransportKind::Dispatch => "dispatch",
            TransportKind::Response => "response",
        })
    }
}

/// AWS error categories for retry and lock handling
#[derive(Debug, Clone, Error)]
pub enum AwsError {
    /// Resource was not found
    #[error("Resource not found: {message}")]
    NotFound { code: String, message: String },

    /// Resource already exists
    #[error("Resource already exists: {message}")]
    AlreadyExists { code: String, message: String },

    /// A conditional write was rejected
    #[error("Condition check failed: {message}")]
    ConditionFailed { message: String },

    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded ({code})")]
    Throttled { code: String },

    /// The request never produced a service response
    #[error("{kind} failure: {message}")]
    Transport { kind: TransportKind, message: String },

    /// Generic AWS SDK error with code and message
    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    /// Service error code, if the failure came from a service response
    pub fn code(&self) -> Option<&str> {
        match self {
            AwsError::NotFound { code, .. }
            | AwsError::AlreadyExists { code, .. }
            | AwsError::Throttled { code } => Some(code),
            AwsError::ConditionFailed { .. } => Some(CONDITION_FAILED_CODE),
            AwsError::Transport { .. } => None,
            AwsError::Sdk { code, .. } => code.as_deref(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, AwsError::AlreadyExists { .. })
    }

    pub fn is_condition_failed(&self) -> bool {
        matches!(self, AwsError::ConditionFailed { .. })
    }

    /// Check if this is a transient error worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, AwsError::Throttled { .. } | AwsError::Transport { .. })
    }
}

const CONDITION_FAILED_CODE: &str = "ConditionalCheckFailedException";

/// Known AWS error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    "ResourceNotFoundException",
    "NoSuchEntity",
    "EntityNotFoundException",
    "NotFoundException",
];

/// Known AWS error codes for "already exists" conditions
const ALREADY_EXISTS_CODES: &[&str] = &[
    "EntityAlreadyExists",
    "AlreadyExistsException",
    "ResourceInUseException",
];

/// Known AWS error codes for throttling/rate limiting
pub const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "ProvisionedThroughputExceededException",
    "RequestThrottled",
];

/// Classify an AWS error from its code and message.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if c == CONDITION_FAILED_CODE => AwsError::ConditionFailed { message },
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound {
            code: c.to_string(),
            message,
        },
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => AwsError::AlreadyExists {
            code: c.to_string(),
            message,
        },
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled {
            code: c.to_string(),
        },
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Classify any SDK operation error.
///
/// Transport failures are recognized from the `SdkError` variant; service
/// errors go through [`classify_aws_error`] with the code and message from
/// `ProvideErrorMetadata`. All service crates share the same `SdkError` type,
/// so this works for DynamoDB and STS alike.
pub fn classify_sdk_error<E, R>(err: &SdkError<E, R>) -> AwsError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: fmt::Debug,
{
    let kind = match err {
        SdkError::TimeoutError(_) => Some(TransportKind::Timeout),
        SdkError::DispatchFailure(_) => Some(TransportKind::Dispatch),
        SdkError::ResponseError(_) => Some(TransportKind::Response),
        _ => None,
    };
    if let Some(kind) = kind {
        return AwsError::Transport {
            kind,
            message: DisplayErrorContext(err).to_string(),
        };
    }
    match err.code() {
        Some(code) => classify_aws_error(Some(code), err.message()),
        None => AwsError::Sdk {
            code: None,
            message: DisplayErrorContext(err).to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_codes() {
        for code in NOT_FOUND_CODES {
            let err = classify_aws_error(Some(code), Some("some message"));
            assert!(err.is_not_found(), "Expected NotFound for code: {code}");
            assert_eq!(err.code(), Some(*code));
        }
    }

    #[test]
    fn already_exists_codes() {
        for code in ALREADY_EXISTS_CODES {
            let err = classify_aws_error(Some(code), Some("msg"));
            assert!(
                err.is_already_exists(),
                "Expected AlreadyExists for code: {code}"
            );
        }
    }

    #[test]
    fn throttling_codes() {
        for code in THROTTLING_CODES {
            let err = classify_aws_error(Some(code), Some("msg"));
            assert!(err.is_retryable(), "Expected retryable for code: {code}");
            assert!(matches!(err, AwsError::Throttled { .. }));
        }
    }

    #[test]
    fn conditional_check_failure() {
        let err = classify_aws_error(Some("ConditionalCheckFailedException"), Some("exists"));
        assert!(err.is_condition_failed());
        assert!(!err.is_retryable());
        assert_eq!(err.code(), Some("ConditionalCheckFailedException"));
    }

    #[test]
    fn unknown_and_missing_codes() {
        let err = classify_aws_error(Some("AccessDenied"), Some("details"));
        assert!(matches!(err, AwsError::Sdk { .. }));
        assert_eq!(err.code(), Some("AccessDenied"));
        assert!(!err.is_retryable());

        let err2 = classify_aws_error(None, Some("something failed"));
        assert!(matches!(err2, AwsError::Sdk { code: None, .. }));
    }

    #[test]
    fn transport_errors_are_retryable_without_code() {
        let err = AwsError::Transport {
            kind: TransportKind::Timeout,
            message: "operation timed out".into(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.code(), None);
        assert_eq!(err.to_string(), "timeout failure: operation timed out");
    }
}
