//! lakehub-core - Concurrency and consistency layer of the lakehub control plane
//!
//! Every request runs as an isolated invocation, so coordination goes
//! through external stores rather than in-process state.
//!
//! ## Modules
//!
//! - [`locks`]: Lock service over a conditional-write lock table
//! - [`transaction`]: Compensating transactions for non-transactional resources
//! - [`broker`]: Cross-account metadata-role sessions
//! - [`retry`]: Fixed-backoff retry of transient AWS failures
//! - [`protection`]: Locked, compensated edits of resource-link protection
//! - [`response`]: API error rendering

pub mod account;
pub mod broker;
pub mod config;
pub mod context;
pub mod error;
pub mod locks;
pub mod logging;
pub mod protection;
pub mod response;
pub mod retry;
pub mod transaction;

pub use broker::{AssumeError, AwsSession, CrossAccountSessionBroker};
pub use config::{ConfigError, CoreConfig};
pub use context::AwsContext;
pub use error::AwsError;
pub use locks::{LockError, LockService};
pub use response::ApiError;
pub use retry::{RetryDecorator, RetryPolicy};
