//! Rendering of core errors as API error responses

use crate::broker::AssumeError;
use crate::locks::LockError;
use crate::protection::ProtectionError;
use serde::Serialize;
use std::fmt;

pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_LOCKED: u16 = 423;
pub const STATUS_INTERNAL_SERVER_ERROR: u16 = 500;

/// JSON body of an error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

/// An error ready to be sent to an API client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    status: u16,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.into(),
                message: message.into(),
                request_id: None,
                retryable: None,
            },
        }
    }

    fn internal(message: impl fmt::Display) -> Self {
        Self::new(STATUS_INTERNAL_SERVER_ERROR, "InternalError", message.to_string())
    }

    /// Mark the error as one the client may retry unchanged
    pub fn retryable(mut self) -> Self {
        self.body.retryable = Some(true);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.body.request_id = Some(request_id.into());
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &ErrorBody {
        &self.body
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= STATUS_INTERNAL_SERVER_ERROR
    }

    pub fn into_parts(self) -> (u16, ErrorBody) {
        (self.status, self.body)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.body)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.status, self.body.code, self.body.message)
    }
}

impl From<&LockError> for ApiError {
    fn from(err: &LockError) -> Self {
        match err {
            LockError::ResourceIsLocked(conflict) => {
                ApiError::new(STATUS_LOCKED, "ResourceIsLocked", conflict.to_string()).retryable()
            }
            other => ApiError::internal(other),
        }
    }
}

impl From<&AssumeError> for ApiError {
    fn from(err: &AssumeError) -> Self {
        match err {
            AssumeError::Unsupported(_) => ApiError::new(
                STATUS_BAD_REQUEST,
                "UnsupportedAssumeMetadataRole",
                err.to_string(),
            ),
            AssumeError::CannotAssumeMetadataRole { .. } => ApiError::new(
                STATUS_INTERNAL_SERVER_ERROR,
                "CannotAssumeMetadataRole",
                err.to_string(),
            ),
            other => ApiError::internal(other),
        }
    }
}

impl From<&ProtectionError> for ApiError {
    fn from(err: &ProtectionError) -> Self {
        match err {
            ProtectionError::Lock(lock) => lock.into(),
            other => ApiError::internal(other),
        }
    }
}
