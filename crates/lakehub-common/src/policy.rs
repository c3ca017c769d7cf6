//! JSON access-policy documents
//!
//! A [`PolicyDocument`] is a value object: every edit returns a new document
//! and leaves the receiver untouched. Documents are rebuilt from the remote
//! store before each edit, never cached.

use crate::defaults::POLICY_SIZE_WARN_RATIO;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// IAM policy language version written into new documents
pub const POLICY_VERSION: &str = "2012-10-17";

/// A single policy statement, kept as raw JSON so unknown keys survive edits
pub type Statement = Map<String, Value>;

const REQUIRED_RESOURCE_POLICY_KEYS: &[&str] = &["Sid", "Effect", "Principal", "Action", "Resource"];
const OPTIONAL_RESOURCE_POLICY_KEYS: &[&str] = &["Condition"];
const RESOURCE_POLICY_PRINCIPAL_TYPES: &[&str] = &["AWS", "Federated"];

/// Errors raised while building or editing a policy document
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Statement with Sid '{0}' not found")]
    StatementNotFound(String),

    #[error("Policy size {size} exceeds the {limit} byte limit")]
    SizeExceeded { size: usize, limit: usize },

    #[error("Invalid statement in resource policy ({reason}): {statement}")]
    InvalidStatement {
        reason: &'static str,
        statement: String,
    },

    #[error("Malformed policy document: {0}")]
    Malformed(String),

    #[error("Failed to parse policy JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl PolicyError {
    fn invalid(reason: &'static str, statement: &Statement) -> Self {
        PolicyError::InvalidStatement {
            reason,
            statement: Value::Object(statement.clone()).to_string(),
        }
    }
}

/// Kind of resource a policy is attached to
///
/// Each kind carries the AWS size limit for its compact JSON encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyDocumentType {
    Managed,
    Glue,
    Bucket,
    Kms,
    Sns,
}

impl PolicyDocumentType {
    pub fn max_policy_length(self) -> usize {
        match self {
            PolicyDocumentType::Managed => 6144,
            PolicyDocumentType::Glue => 10240,
            PolicyDocumentType::Bucket => 20480,
            PolicyDocumentType::Kms => 32768,
            PolicyDocumentType::Sns => 30720,
        }
    }
}

/// An AWS policy document: a version and an ordered list of statements
#[derive(Clone)]
pub struct PolicyDocument {
    version: String,
    statements: Vec<Statement>,
    document_type: Option<PolicyDocumentType>,
    policy_hash: Option<String>,
}

impl PolicyDocument {
    /// Build a document, enforcing the size limit and shape rules of its type
    pub fn new(
        version: impl Into<String>,
        statements: Vec<Statement>,
        document_type: Option<PolicyDocumentType>,
    ) -> Result<Self, PolicyError> {
        let doc = Self {
            version: version.into(),
            statements,
            document_type,
            policy_hash: None,
        };
        doc.validate()?;
        Ok(doc)
    }

    pub fn managed(statements: Vec<Statement>) -> Result<Self, PolicyError> {
        Self::new(POLICY_VERSION, statements, Some(PolicyDocumentType::Managed))
    }

    pub fn bucket(statements: Vec<Statement>) -> Result<Self, PolicyError> {
        Self::new(POLICY_VERSION, statements, Some(PolicyDocumentType::Bucket))
    }

    pub fn key(statements: Vec<Statement>) -> Result<Self, PolicyError> {
        Self::new(POLICY_VERSION, statements, Some(PolicyDocumentType::Kms))
    }

    pub fn sns(statements: Vec<Statement>) -> Result<Self, PolicyError> {
        Self::new(POLICY_VERSION, statements, Some(PolicyDocumentType::Sns))
    }

    pub fn glue(statements: Vec<Statement>) -> Result<Self, PolicyError> {
        Self::new(POLICY_VERSION, statements, Some(PolicyDocumentType::Glue))
    }

    /// Parse a document fetched from the remote store
    ///
    /// `Statement` may be a single object or a list, as AWS accepts both.
    /// The store's hash, if any, is kept on the document and carried through
    /// every edit.
    pub fn from_json(
        text: &str,
        document_type: Option<PolicyDocumentType>,
        policy_hash: Option<String>,
    ) -> Result<Self, PolicyError> {
        let raw: Value = serde_json::from_str(text)?;
        let Value::Object(mut raw) = raw else {
            return Err(PolicyError::Malformed("document is not an object".into()));
        };

        let version = match raw.remove("Version") {
            Some(Value::String(v)) => v,
            None => POLICY_VERSION.to_string(),
            Some(_) => return Err(PolicyError::Malformed("Version is not a string".into())),
        };

        let statements = match raw.remove("Statement") {
            None => Vec::new(),
            Some(Value::Object(statement)) => vec![statement],
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(statement) => Ok(statement),
                    other => Err(PolicyError::Malformed(format!(
                        "statement is not an object: {other}"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(PolicyError::Malformed(
                    "Statement is neither an object nor a list".into(),
                ));
            }
        };

        let mut doc = Self::new(version, statements, document_type)?;
        doc.policy_hash = policy_hash;
        Ok(doc)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn document_type(&self) -> Option<PolicyDocumentType> {
        self.document_type
    }

    /// Hash reported by the remote store when the document was fetched
    pub fn policy_hash(&self) -> Option<&str> {
        self.policy_hash.as_deref()
    }

    pub fn has_statements(&self) -> bool {
        !self.statements.is_empty()
    }

    pub fn has_statement_with_sid(&self, sid: &str) -> bool {
        self.position_of(sid).is_some()
    }

    pub fn get_statement_by_sid(&self, sid: &str) -> Result<&Statement, PolicyError> {
        self.position_of(sid)
            .map(|idx| &self.statements[idx])
            .ok_or_else(|| PolicyError::StatementNotFound(sid.to_string()))
    }

    /// Replace the statement sharing `statement`'s Sid, or append it
    ///
    /// A replaced statement keeps its position; all other statements keep
    /// their relative order.
    pub fn add_or_update_statement(&self, statement: Statement) -> Result<Self, PolicyError> {
        let mut statements = self.statements.clone();
        let existing = statement
            .get("Sid")
            .and_then(Value::as_str)
            .and_then(|sid| self.position_of(sid));
        match existing {
            Some(idx) => statements[idx] = statement,
            None => statements.push(statement),
        }
        self.with_statements(statements)
    }

    /// Remove the statement with `sid`; unchanged if there is none
    pub fn delete_statement_if_present(&self, sid: &str) -> Result<Self, PolicyError> {
        let statements = self
            .statements
            .iter()
            .filter(|s| s.get("Sid").and_then(Value::as_str) != Some(sid))
            .cloned()
            .collect();
        self.with_statements(statements)
    }

    /// Principals per principal type that are granted `action`
    ///
    /// Statements with a string `Principal` (e.g. `"*"`) contribute nothing.
    pub fn principals_with_action(&self, action: &str) -> BTreeMap<String, Vec<String>> {
        let mut principals: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for statement in &self.statements {
            let grants = statement
                .get("Action")
                .map(|a| string_or_list(a).any(|a| a == action))
                .unwrap_or(false);
            if !grants {
                continue;
            }
            if let Some(Value::Object(by_type)) = statement.get("Principal") {
                for (principal_type, value) in by_type {
                    principals
                        .entry(principal_type.clone())
                        .or_default()
                        .extend(string_or_list(value).map(str::to_string));
                }
            }
        }
        principals
    }

    pub fn to_value(&self) -> Value {
        json!({
            "Version": self.version,
            "Statement": self.statements,
        })
    }

    /// Compact JSON encoding, the form AWS measures size limits against
    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }

    fn position_of(&self, sid: &str) -> Option<usize> {
        self.statements
            .iter()
            .position(|s| s.get("Sid").and_then(Value::as_str) == Some(sid))
    }

    fn with_statements(&self, statements: Vec<Statement>) -> Result<Self, PolicyError> {
        let mut doc = Self::new(self.version.clone(), statements, self.document_type)?;
        doc.policy_hash = self.policy_hash.clone();
        Ok(doc)
    }

    fn validate(&self) -> Result<(), PolicyError> {
        let Some(document_type) = self.document_type else {
            return Ok(());
        };
        self.ensure_size_within(document_type.max_policy_length())?;
        if document_type == PolicyDocumentType::Sns {
            self.validate_resource_policy_statements()?;
        }
        Ok(())
    }

    fn ensure_size_within(&self, limit: usize) -> Result<(), PolicyError> {
        let size = self.encode().len();
        if size > limit {
            return Err(PolicyError::SizeExceeded { size, limit });
        }
        // The service occasionally rejects documents slightly below the limit
        if size as f64 > POLICY_SIZE_WARN_RATIO * limit as f64 {
            warn!(size, limit, "Close to policy size limit");
        }
        Ok(())
    }

    /// Check resource-policy statements for required and allowed keys
    pub fn validate_resource_policy_statements(&self) -> Result<(), PolicyError> {
        for statement in &self.statements {
            if !REQUIRED_RESOURCE_POLICY_KEYS
                .iter()
                .all(|k| statement.contains_key(*k))
            {
                return Err(PolicyError::invalid("missing required key", statement));
            }
            if !statement.keys().all(|k| {
                REQUIRED_RESOURCE_POLICY_KEYS.contains(&k.as_str())
                    || OPTIONAL_RESOURCE_POLICY_KEYS.contains(&k.as_str())
            }) {
                return Err(PolicyError::invalid("unsupported keys", statement));
            }
            if !matches!(
                statement.get("Effect").and_then(Value::as_str),
                Some("Allow" | "Deny")
            ) {
                return Err(PolicyError::invalid("invalid effect", statement));
            }
            let principal_ok = match statement.get("Principal") {
                Some(Value::Object(by_type)) => by_type
                    .keys()
                    .all(|k| RESOURCE_POLICY_PRINCIPAL_TYPES.contains(&k.as_str())),
                _ => false,
            };
            if !principal_ok {
                return Err(PolicyError::invalid("invalid principal", statement));
            }
        }
        Ok(())
    }
}

impl PartialEq for PolicyDocument {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version && self.statements == other.statements
    }
}

impl fmt::Debug for PolicyDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PolicyDocument({})", self.encode())
    }
}

/// Iterate a JSON value that is either a string or a list of strings
pub fn string_or_list(value: &Value) -> impl Iterator<Item = &str> {
    let items: Vec<&str> = match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    items.into_iter()
}

/// Collect a string-or-list JSON value into a sorted set
pub fn string_set(value: &Value) -> BTreeSet<String> {
    string_or_list(value).map(str::to_string).collect()
}
