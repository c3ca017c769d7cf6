//! AWS test utilities

use chrono::Utc;
use lakehub_common::defaults::DEFAULT_REGION;

/// AWS region for tests: `AWS_REGION`, then `AWS_DEFAULT_REGION`, then the
/// control plane's default region
pub fn get_test_region() -> String {
    std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .unwrap_or_else(|_| DEFAULT_REGION.to_string())
}

/// Unique request id of the form `test-{timestamp_ms}-{counter}`
pub fn test_request_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let ts = Utc::now().timestamp_millis();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("test-{}-{}", ts, counter)
}

/// Lock table prefix isolating one test run, e.g. `test-1700000000000-0-`
pub fn test_lock_prefix() -> String {
    format!("{}-", test_request_id())
}
