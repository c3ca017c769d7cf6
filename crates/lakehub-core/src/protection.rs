//! Lock, edit and write the resource-link protection of a catalog policy
//!
//! The policy is fetched fresh under the lock, edited in memory, and written
//! back only if the edit changes something. A failure of the caller's body
//! after the write restores the fetched policy.

use crate::error::AwsError;
use crate::locks::{LockError, LockService, LocksTable};
use crate::transaction::with_compensation;
use lakehub_common::protection::{add_protection, remove_protection};
use lakehub_common::{LockKey, PolicyDocument, PolicyError};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

/// Remote home of one resource policy
pub trait PolicyStore: Send + Sync {
    /// Name of the policy owner, used in logs
    fn describe(&self) -> String;

    /// Current policy, `None` if none is attached
    fn fetch(&self) -> impl Future<Output = Result<Option<PolicyDocument>, AwsError>> + Send;

    /// Replace the policy; `None` deletes it
    fn put(
        &self,
        policy: Option<&PolicyDocument>,
    ) -> impl Future<Output = Result<(), AwsError>> + Send;
}

/// Policy store held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryPolicyStore {
    name: String,
    policy: Arc<Mutex<Option<PolicyDocument>>>,
    writes: Arc<Mutex<u32>>,
}

impl InMemoryPolicyStore {
    pub fn new(name: impl Into<String>, policy: Option<PolicyDocument>) -> Self {
        Self {
            name: name.into(),
            policy: Arc::new(Mutex::new(policy)),
            writes: Arc::default(),
        }
    }

    pub fn policy(&self) -> Option<PolicyDocument> {
        self.policy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of `put` calls so far
    pub fn writes(&self) -> u32 {
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PolicyStore for InMemoryPolicyStore {
    fn describe(&self) -> String {
        self.name.clone()
    }

    async fn fetch(&self) -> Result<Option<PolicyDocument>, AwsError> {
        Ok(self.policy())
    }

    async fn put(&self, policy: Option<&PolicyDocument>) -> Result<(), AwsError> {
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        *self.policy.lock().unwrap_or_else(PoisonError::into_inner) = policy.cloned();
        Ok(())
    }
}

/// Requested change to the guarded set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectionEdit {
    Protect(BTreeSet<String>),
    Unprotect(BTreeSet<String>),
}

#[derive(Debug, Error)]
pub enum ProtectionError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("Policy store failure for {resource}")]
    Store {
        resource: String,
        #[source]
        source: AwsError,
    },
}

/// Apply `edit` to the protection statement of `store`'s policy while
/// holding the lock for `key`, then run `body`
///
/// `principal` is the identity the Deny statement names. Removing the last
/// statement deletes the policy instead of writing an empty one.
pub async fn update_protection<T, P, B, BFut, R, E>(
    locks: &LockService<T>,
    store: &P,
    key: &LockKey,
    principal: &str,
    edit: &ProtectionEdit,
    body: B,
) -> Result<R, E>
where
    T: LocksTable,
    P: PolicyStore,
    B: FnOnce() -> BFut,
    BFut: Future<Output = Result<R, E>>,
    E: From<ProtectionError> + From<LockError> + fmt::Display,
{
    let name = store.describe();
    let resource = name.as_str();

    locks
        .with_lock(key, move || async move {
            let current = store
                .fetch()
                .await
                .map_err(|source| store_error::<E>(resource, source))?;

            let edited = edit_policy(current.as_ref(), principal, edit)
                .map_err(|e| E::from(ProtectionError::from(e)))?;

            let Some(edited) = edited else {
                info!(resource, ?edit, "Protection already in effect");
                return body().await;
            };

            let new_state = edited.has_statements().then_some(edited);
            debug!(resource, delete = new_state.is_none(), "Writing policy");
            let new_state = new_state.as_ref();

            with_compensation(
                resource,
                move || async move {
                    store
                        .put(new_state)
                        .await
                        .map_err(|source| store_error::<E>(resource, source))?;
                    Ok::<_, E>(current)
                },
                move |prior| async move { store.put(prior.as_ref()).await },
                body,
            )
            .await
        })
        .await
}

fn edit_policy(
    current: Option<&PolicyDocument>,
    principal: &str,
    edit: &ProtectionEdit,
) -> Result<Option<PolicyDocument>, PolicyError> {
    match (edit, current) {
        (ProtectionEdit::Protect(resources), Some(doc)) => add_protection(doc, principal, resources),
        (ProtectionEdit::Protect(resources), None) => {
            add_protection(&PolicyDocument::glue(Vec::new())?, principal, resources)
        }
        (ProtectionEdit::Unprotect(resources), Some(doc)) => {
            remove_protection(doc, principal, resources)
        }
        (ProtectionEdit::Unprotect(_), None) => Ok(None),
    }
}

fn store_error<E: From<ProtectionError>>(resource: &str, source: AwsError) -> E {
    E::from(ProtectionError::Store {
        resource: resource.to_string(),
        source,
    })
}
