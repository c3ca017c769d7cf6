//! Distributed locks over a shared lock table

pub mod dynamo;
pub mod memory;
pub mod service;
pub mod table;

pub use dynamo::DynamoLocksTable;
pub use memory::InMemoryLocksTable;
pub use service::{LockConflict, LockError, LockOutcome, LockService};
pub use table::{LocksTable, LocksTableError};
