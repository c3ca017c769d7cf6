//! Storage abstraction for lock rows

use crate::error::AwsError;
use lakehub_common::Lock;
use std::future::Future;
use thiserror::Error;

/// Lock store errors
#[derive(Debug, Error)]
pub enum LocksTableError {
    /// A row with this lock id is already present
    #[error("Lock '{0}' already exists")]
    AlreadyExists(String),

    /// No row with this lock id is present
    #[error("Lock '{0}' not found")]
    NotFound(String),

    /// A stored row could not be decoded
    #[error("Corrupt lock row '{lock_id}': {reason}")]
    Corrupt { lock_id: String, reason: String },

    /// The store itself failed
    #[error("Lock store failure: {0}")]
    Store(#[from] AwsError),
}

/// Key-value store for lock rows keyed by lock id
///
/// `create` and `delete` are conditional writes; `get` and `list` read
/// strongly consistent data from the same partition the writes go to.
pub trait LocksTable: Send + Sync {
    /// Insert `lock` unless a row with its id already exists
    fn create(&self, lock: &Lock) -> impl Future<Output = Result<(), LocksTableError>> + Send;

    /// Fetch the row for `lock_id`
    fn get(&self, lock_id: &str) -> impl Future<Output = Result<Lock, LocksTableError>> + Send;

    /// Remove the row for `lock_id`; fails with `NotFound` if it is absent
    fn delete(&self, lock_id: &str) -> impl Future<Output = Result<(), LocksTableError>> + Send;

    /// Every lock row currently in the store
    fn list(&self) -> impl Future<Output = Result<Vec<Lock>, LocksTableError>> + Send;

    /// Best-effort probe: `false` only when the store reports the row absent
    fn exists(&self, lock_id: &str) -> impl Future<Output = Result<bool, LocksTableError>> + Send {
        async move {
            match self.get(lock_id).await {
                Ok(_) => Ok(true),
                Err(LocksTableError::NotFound(_)) => Ok(false),
                Err(e) => Err(e),
            }
        }
    }
}
