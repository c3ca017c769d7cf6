//! Shared test utilities for lakehub
//!
//! ## Modules
//!
//! - [`aws`]: AWS region detection and request id generation
//! - [`fixtures`]: Account records for broker and directory tests

pub mod aws;
pub mod fixtures;

pub use aws::{get_test_region, test_lock_prefix, test_request_id};
pub use fixtures::{TestAccounts, api_account, managed_account};
