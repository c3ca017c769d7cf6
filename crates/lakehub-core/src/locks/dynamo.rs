//! DynamoDB-backed lock table
//!
//! One item per lock, keyed by `lock_id`. Creation and deletion are
//! conditional writes, reads are strongly consistent.

use super::table::{LocksTable, LocksTableError};
use crate::config::LockConfig;
use crate::context::AwsContext;
use crate::error::classify_sdk_error;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::operation::delete_item::DeleteItemError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, Utc};
use lakehub_common::defaults::LOCKS_TABLE_HASH_KEY;
use lakehub_common::{Lock, LockScope};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

const ATTR_LOCK_ID: &str = LOCKS_TABLE_HASH_KEY;
const ATTR_SCOPE: &str = "scope";
const ATTR_TIMESTAMP: &str = "timestamp";
const ATTR_DATA: &str = "data";
const ATTR_REQUEST_ID: &str = "request_id";

/// Lock table stored in DynamoDB
#[derive(Clone)]
pub struct DynamoLocksTable {
    client: Client,
    table_name: String,
}

impl std::fmt::Debug for DynamoLocksTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoLocksTable")
            .field("table_name", &self.table_name)
            .finish()
    }
}

impl DynamoLocksTable {
    /// Build the table client from the shared context and lock settings
    pub fn from_context(aws: &AwsContext, config: &LockConfig) -> Self {
        let client = aws.dynamodb_client(config.endpoint.as_deref(), Some(config.timeout()));
        Self::from_client(client, config.table_name())
    }

    /// Create from a pre-built client
    pub fn from_client(client: Client, table_name: String) -> Self {
        Self { client, table_name }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn lock_to_item(lock: &Lock) -> HashMap<String, AttributeValue> {
        HashMap::from([
            (ATTR_LOCK_ID.to_string(), AttributeValue::S(lock.lock_id.clone())),
            (ATTR_SCOPE.to_string(), AttributeValue::S(lock.scope.to_string())),
            (
                ATTR_TIMESTAMP.to_string(),
                AttributeValue::S(lock.timestamp.to_rfc3339()),
            ),
            (
                ATTR_DATA.to_string(),
                AttributeValue::S(Value::Object(lock.data.clone()).to_string()),
            ),
            (
                ATTR_REQUEST_ID.to_string(),
                AttributeValue::S(lock.request_id.clone()),
            ),
        ])
    }

    fn item_to_lock(item: &HashMap<String, AttributeValue>) -> Result<Lock, LocksTableError> {
        let lock_id = string_attr(item, ATTR_LOCK_ID).ok_or_else(|| LocksTableError::Corrupt {
            lock_id: "<unknown>".to_string(),
            reason: format!("missing {ATTR_LOCK_ID}"),
        })?;
        let corrupt = |reason: String| LocksTableError::Corrupt {
            lock_id: lock_id.to_string(),
            reason,
        };

        let scope = string_attr(item, ATTR_SCOPE)
            .ok_or_else(|| corrupt(format!("missing {ATTR_SCOPE}")))?
            .parse::<LockScope>()
            .map_err(|e| corrupt(e.to_string()))?;

        let timestamp = string_attr(item, ATTR_TIMESTAMP)
            .ok_or_else(|| corrupt(format!("missing {ATTR_TIMESTAMP}")))
            .and_then(|s| {
                DateTime::parse_from_rfc3339(s).map_err(|e| corrupt(format!("bad timestamp: {e}")))
            })?
            .with_timezone(&Utc);

        let data = match string_attr(item, ATTR_DATA) {
            Some(raw) => serde_json::from_str::<Map<String, Value>>(raw)
                .map_err(|e| corrupt(format!("bad data: {e}")))?,
            None => Map::new(),
        };

        let request_id = string_attr(item, ATTR_REQUEST_ID)
            .map(str::to_string)
            .unwrap_or_default();

        Ok(Lock {
            lock_id: lock_id.to_string(),
            scope,
            timestamp,
            data,
            request_id,
        })
    }
}

fn string_attr<'a>(item: &'a HashMap<String, AttributeValue>, name: &str) -> Option<&'a str> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .map(String::as_str)
}

impl LocksTable for DynamoLocksTable {
    async fn create(&self, lock: &Lock) -> Result<(), LocksTableError> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(Self::lock_to_item(lock)))
            .condition_expression("attribute_not_exists(#pk)")
            .expression_attribute_names("#pk", ATTR_LOCK_ID)
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!(lock_id = %lock.lock_id, table = %self.table_name, "Lock row created");
                Ok(())
            }
            Err(e)
                if matches!(
                    e.as_service_error(),
                    Some(PutItemError::ConditionalCheckFailedException(_))
                ) =>
            {
                Err(LocksTableError::AlreadyExists(lock.lock_id.clone()))
            }
            Err(e) => Err(LocksTableError::Store(classify_sdk_error(&e))),
        }
    }

    async fn get(&self, lock_id: &str) -> Result<Lock, LocksTableError> {
        let response = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(ATTR_LOCK_ID, AttributeValue::S(lock_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| LocksTableError::Store(classify_sdk_error(&e)))?;

        match response.item() {
            Some(item) => Self::item_to_lock(item),
            None => Err(LocksTableError::NotFound(lock_id.to_string())),
        }
    }

    async fn delete(&self, lock_id: &str) -> Result<(), LocksTableError> {
        let result = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key(ATTR_LOCK_ID, AttributeValue::S(lock_id.to_string()))
            .condition_expression("attribute_exists(#pk)")
            .expression_attribute_names("#pk", ATTR_LOCK_ID)
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!(lock_id = %lock_id, table = %self.table_name, "Lock row deleted");
                Ok(())
            }
            Err(e)
                if matches!(
                    e.as_service_error(),
                    Some(DeleteItemError::ConditionalCheckFailedException(_))
                ) =>
            {
                Err(LocksTableError::NotFound(lock_id.to_string()))
            }
            Err(e) => Err(LocksTableError::Store(classify_sdk_error(&e))),
        }
    }

    async fn list(&self) -> Result<Vec<Lock>, LocksTableError> {
        let mut locks = Vec::new();
        let mut last_evaluated_key = None;

        loop {
            let mut request = self
                .client
                .scan()
                .table_name(&self.table_name)
                .consistent_read(true);

            if let Some(key) = last_evaluated_key.take() {
                request = request.set_exclusive_start_key(Some(key));
            }

            let response = request
                .send()
                .await
                .map_err(|e| LocksTableError::Store(classify_sdk_error(&e)))?;

            for item in response.items() {
                locks.push(Self::item_to_lock(item)?);
            }

            match response.last_evaluated_key() {
                Some(key) if !key.is_empty() => {
                    last_evaluated_key = Some(key.clone());
                }
                _ => break,
            }
        }

        Ok(locks)
    }
}
