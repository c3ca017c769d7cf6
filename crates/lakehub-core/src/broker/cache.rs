//! Bounded cache of assumed sessions

use super::credentials::AwsSession;
use crate::config::BrokerConfig;
use chrono::Utc;
use lakehub_common::AccountId;
use moka::future::Cache;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    account_id: AccountId,
    region: String,
}

impl SessionKey {
    fn new(account_id: &AccountId, region: &str) -> Self {
        Self {
            account_id: account_id.clone(),
            region: region.to_string(),
        }
    }
}

/// Sessions per `(account_id, region)`
///
/// Entries are evicted after the configured TTL, and a session whose
/// credentials expire within the margin is treated as a miss.
#[derive(Clone)]
pub struct SessionCache {
    cache: Cache<SessionKey, AwsSession>,
    expiry_margin: Duration,
}

impl SessionCache {
    pub fn new(max_capacity: u64, time_to_live: Duration, expiry_margin: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(time_to_live)
            .build();
        Self {
            cache,
            expiry_margin,
        }
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::new(
            config.cache_capacity,
            config.cache_ttl(),
            config.expiry_margin(),
        )
    }

    pub async fn get(&self, account_id: &AccountId, region: &str) -> Option<AwsSession> {
        let key = SessionKey::new(account_id, region);
        let session = self.cache.get(&key).await?;
        if session.expires_within(self.expiry_margin, Utc::now()) {
            debug!(account_id = %account_id, region, "Cached session about to expire");
            self.cache.invalidate(&key).await;
            return None;
        }
        Some(session)
    }

    pub async fn insert(&self, session: AwsSession) {
        let key = SessionKey::new(session.account_id(), session.region());
        self.cache.insert(key, session).await;
    }

    pub async fn invalidate(&self, account_id: &AccountId, region: &str) {
        self.cache
            .invalidate(&SessionKey::new(account_id, region))
            .await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("entries", &self.cache.entry_count())
            .field("expiry_margin", &self.expiry_margin)
            .finish()
    }
}
