//! Acquire and release locks for one request
//!
//! A `LockService` belongs to a single request. It stamps new locks with the
//! request id and counts acquisitions minus releases, so a leaked lock shows
//! up as a nonzero count when the request finishes.

use super::table::{LocksTable, LocksTableError};
use crate::config::LockConfig;
use chrono::Utc;
use lakehub_common::{Lock, LockKey};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Details of a failed acquisition
#[derive(Debug, Clone, PartialEq)]
pub struct LockConflict {
    /// The lock this request tried to create
    pub attempted: Lock,
    /// The row that blocked it; `None` if it vanished before it could be read
    pub existing: Option<Lock>,
    /// Whether the blocking row is older than the staleness threshold
    pub stale: bool,
}

impl LockConflict {
    pub fn lock_id(&self) -> &str {
        &self.attempted.lock_id
    }
}

impl fmt::Display for LockConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.existing {
            Some(_) => write!(
                f,
                "Resource {} is currently locked. Please reach out to the platform team if this problem persists.",
                self.attempted.lock_id
            ),
            None => write!(
                f,
                "Resource {} was locked during the request. Please try again and reach out to the platform team if this problem persists.",
                self.attempted.lock_id
            ),
        }
    }
}

/// Result of [`LockService::try_acquire_lock`]
#[derive(Debug, Clone, PartialEq)]
pub enum LockOutcome {
    Acquired(Lock),
    Conflict(LockConflict),
}

impl LockOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired(_))
    }
}

/// Lock service errors
#[derive(Debug, Error)]
pub enum LockError {
    /// Another request holds the lock
    #[error("{0}")]
    ResourceIsLocked(LockConflict),

    /// Release of a lock whose row is already gone
    #[error("Lock '{0}' is not held and cannot be released")]
    NotHeld(String),

    #[error(transparent)]
    Table(LocksTableError),
}

impl From<LocksTableError> for LockError {
    fn from(err: LocksTableError) -> Self {
        LockError::Table(err)
    }
}

impl LockError {
    /// Whether the caller may succeed by simply retrying later
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::ResourceIsLocked(_))
    }
}

/// Lock manager bound to one request
pub struct LockService<T> {
    table: T,
    request_id: RwLock<String>,
    lock_count: AtomicI64,
    stale_after: Duration,
}

impl<T: LocksTable> LockService<T> {
    pub fn new(table: T, config: &LockConfig) -> Self {
        Self::with_stale_after(table, config.stale_after())
    }

    pub fn with_stale_after(table: T, stale_after: Duration) -> Self {
        Self {
            table,
            request_id: RwLock::new(String::new()),
            lock_count: AtomicI64::new(0),
            stale_after,
        }
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    /// Start a new request: stamp future locks with `request_id` and reset the count
    pub fn set_request_id(&self, request_id: impl Into<String>) {
        let request_id = request_id.into();
        debug!(request_id = %request_id, "Lock service bound to request");
        *self
            .request_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = request_id;
        self.lock_count.store(0, Ordering::SeqCst);
    }

    pub fn request_id(&self) -> String {
        self.request_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Acquisitions minus releases since the last `set_request_id`
    pub fn lock_count(&self) -> i64 {
        self.lock_count.load(Ordering::SeqCst)
    }

    /// Try to take the lock for `key`, reporting contention as a value
    ///
    /// Contention is never retried here: the caller decides whether to
    /// surface it or give up.
    pub async fn try_acquire_lock(
        &self,
        key: &LockKey,
        data: Map<String, Value>,
    ) -> Result<LockOutcome, LockError> {
        let lock = Lock::new(key, self.request_id(), data);

        match self.table.create(&lock).await {
            Ok(()) => {
                self.lock_count.fetch_add(1, Ordering::SeqCst);
                debug!(lock_id = %lock.lock_id, request_id = %lock.request_id, "Lock acquired");
                Ok(LockOutcome::Acquired(lock))
            }
            Err(LocksTableError::AlreadyExists(_)) => {
                warn!(
                    lock_id = %lock.lock_id,
                    request_id = %lock.request_id,
                    "Possible race condition detected"
                );
                // The holder may have released between our write and this read
                let existing = match self.table.get(&lock.lock_id).await {
                    Ok(existing) => Some(existing),
                    Err(LocksTableError::NotFound(_)) => None,
                    Err(e) => return Err(e.into()),
                };
                let stale = existing.as_ref().is_some_and(|e| self.is_stale(e));
                if let (true, Some(existing)) = (stale, &existing) {
                    error!(
                        lock_id = %existing.lock_id,
                        holder_request_id = %existing.request_id,
                        locked_at = %existing.timestamp,
                        "Stale lock is blocking requests; it must be released manually"
                    );
                }
                Ok(LockOutcome::Conflict(LockConflict {
                    attempted: lock,
                    existing,
                    stale,
                }))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Take the lock for `key` or fail with [`LockError::ResourceIsLocked`]
    pub async fn acquire_lock(&self, key: &LockKey) -> Result<Lock, LockError> {
        self.acquire_lock_with_data(key, Map::new()).await
    }

    /// Like [`acquire_lock`](Self::acquire_lock), storing `data` on the row
    pub async fn acquire_lock_with_data(
        &self,
        key: &LockKey,
        data: Map<String, Value>,
    ) -> Result<Lock, LockError> {
        match self.try_acquire_lock(key, data).await? {
            LockOutcome::Acquired(lock) => Ok(lock),
            LockOutcome::Conflict(conflict) => Err(LockError::ResourceIsLocked(conflict)),
        }
    }

    /// Delete the row for `lock`
    ///
    /// A missing row means this lock was released twice or never held, which
    /// is a logic error and is reported as [`LockError::NotHeld`].
    pub async fn release_lock(&self, lock: &Lock) -> Result<(), LockError> {
        match self.table.delete(&lock.lock_id).await {
            Ok(()) => {
                self.lock_count.fetch_sub(1, Ordering::SeqCst);
                debug!(lock_id = %lock.lock_id, "Lock released");
                Ok(())
            }
            Err(LocksTableError::NotFound(id)) => Err(LockError::NotHeld(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort check whether a row for `lock_id` exists
    pub async fn exists(&self, lock_id: &str) -> Result<bool, LockError> {
        Ok(self.table.exists(lock_id).await?)
    }

    /// Hold the lock for `key` while `body` runs
    ///
    /// The lock is released whether `body` succeeds or fails. If both `body`
    /// and the release fail, the body's error is returned and the release
    /// failure is logged.
    pub async fn with_lock<F, Fut, R, E>(&self, key: &LockKey, body: F) -> Result<R, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<LockError>,
    {
        let lock = self.acquire_lock(key).await?;
        let result = body().await;
        match (result, self.release_lock(&lock).await) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(release_err)) => Err(release_err.into()),
            (Err(body_err), Ok(())) => Err(body_err),
            (Err(body_err), Err(release_err)) => {
                error!(
                    lock_id = %lock.lock_id,
                    error = %release_err,
                    "Failed to release lock after failed operation"
                );
                Err(body_err)
            }
        }
    }

    /// Close the request; returns and logs the number of unreleased locks
    pub fn finish_request(&self) -> i64 {
        let count = self.lock_count();
        let request_id = self.request_id();
        if count != 0 {
            error!(
                request_id = %request_id,
                lock_count = count,
                "Lock count is not zero at end of request"
            );
        } else {
            info!(request_id = %request_id, "All locks released");
        }
        count
    }

    /// Lock rows older than the staleness threshold
    pub async fn stale_locks(&self) -> Result<Vec<Lock>, LockError> {
        let locks = self.table.list().await?;
        Ok(locks.into_iter().filter(|l| self.is_stale(l)).collect())
    }

    fn is_stale(&self, lock: &Lock) -> bool {
        // A timestamp in the future (clock skew) is never stale
        lock.age(Utc::now())
            .to_std()
            .is_ok_and(|age| age > self.stale_after)
    }
}

impl<T> fmt::Debug for LockService<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockService")
            .field("lock_count", &self.lock_count.load(Ordering::SeqCst))
            .field("stale_after", &self.stale_after)
            .finish_non_exhaustive()
    }
}
