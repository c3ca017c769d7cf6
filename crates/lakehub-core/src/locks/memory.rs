//! In-process lock table for tests and local runs

use super::table::{LocksTable, LocksTableError};
use lakehub_common::Lock;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lock table backed by a shared `HashMap`
///
/// Clones share the same rows, so several [`LockService`](super::LockService)
/// instances built on clones behave like concurrent invocations against one
/// store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLocksTable {
    rows: Arc<Mutex<HashMap<String, Lock>>>,
}

impl InMemoryLocksTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    /// Insert or overwrite a row without any condition
    pub fn insert_raw(&self, lock: Lock) {
        self.rows().insert(lock.lock_id.clone(), lock);
    }

    fn rows(&self) -> MutexGuard<'_, HashMap<String, Lock>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LocksTable for InMemoryLocksTable {
    async fn create(&self, lock: &Lock) -> Result<(), LocksTableError> {
        match self.rows().entry(lock.lock_id.clone()) {
            Entry::Occupied(_) => Err(LocksTableError::AlreadyExists(lock.lock_id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(lock.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, lock_id: &str) -> Result<Lock, LocksTableError> {
        self.rows()
            .get(lock_id)
            .cloned()
            .ok_or_else(|| LocksTableError::NotFound(lock_id.to_string()))
    }

    async fn delete(&self, lock_id: &str) -> Result<(), LocksTableError> {
        self.rows()
            .remove(lock_id)
            .map(|_| ())
            .ok_or_else(|| LocksTableError::NotFound(lock_id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Lock>, LocksTableError> {
        let mut locks: Vec<Lock> = self.rows().values().cloned().collect();
        locks.sort_by(|a, b| a.lock_id.cmp(&b.lock_id));
        Ok(locks)
    }
}
