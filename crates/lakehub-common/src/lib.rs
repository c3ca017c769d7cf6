//! lakehub-common - Shared types for the lakehub control plane
//!
//! This crate holds the pieces that need no AWS SDK: lock identity, the
//! account model, policy documents and the resource-link protection edits.
//!
//! ## Modules
//!
//! - [`account`]: Accounts, hubs and the metadata-role target descriptor
//! - [`defaults`]: Default configuration values
//! - [`lock`]: Lock scopes, lock ids and lock rows
//! - [`policy`]: JSON policy documents and their size limits
//! - [`protection`]: Guarded-resource set edits on a policy document

pub mod account;
pub mod defaults;
pub mod lock;
pub mod policy;
pub mod protection;

// Re-export commonly used types
pub use account::{
    Account, AccountId, AccountPurpose, AccountType, AssumableAccountSpec, Environment, Hub,
    Partition, RoleArn,
};
pub use lock::{Lock, LockKey, LockScope, Stage};
pub use policy::{PolicyDocument, PolicyDocumentType, PolicyError, Statement};
