//! Account lookup for the broker

use lakehub_common::{Account, AccountId, AccountPurpose, Environment, Partition};
use std::future::Future;
use thiserror::Error;

/// Account directory errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DirectoryError {
    #[error("Account {0} not found")]
    AccountNotFound(String),

    #[error("Expected exactly one account for {query}, found {count}")]
    AmbiguousAccount { query: String, count: usize },

    /// The directory backend could not be reached
    #[error("Account directory unavailable: {0}")]
    Unavailable(String),
}

/// Source of account records
pub trait AccountDirectory: Send + Sync {
    fn get_account(
        &self,
        id: &AccountId,
    ) -> impl Future<Output = Result<Account, DirectoryError>> + Send;

    /// The single account with this environment, purpose and partition
    fn query_account(
        &self,
        environment: &Environment,
        purpose: &AccountPurpose,
        partition: &Partition,
    ) -> impl Future<Output = Result<Account, DirectoryError>> + Send;
}

/// Directory over a fixed list of accounts
#[derive(Debug, Clone, Default)]
pub struct StaticAccountDirectory {
    accounts: Vec<Account>,
}

impl StaticAccountDirectory {
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self {
            accounts: accounts.into_iter().collect(),
        }
    }

    pub fn push(&mut self, account: Account) {
        self.accounts.push(account);
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }
}

impl AccountDirectory for StaticAccountDirectory {
    async fn get_account(&self, id: &AccountId) -> Result<Account, DirectoryError> {
        self.accounts
            .iter()
            .find(|a| &a.id == id)
            .cloned()
            .ok_or_else(|| DirectoryError::AccountNotFound(id.to_string()))
    }

    async fn query_account(
        &self,
        environment: &Environment,
        purpose: &AccountPurpose,
        partition: &Partition,
    ) -> Result<Account, DirectoryError> {
        let mut matches = self.accounts.iter().filter(|a| {
            &a.environment == environment && &a.purpose == purpose && a.partition() == partition
        });
        let query = || format!("environment={environment}, purpose={purpose}, partition={partition}");

        match (matches.next(), matches.count()) {
            (None, _) => Err(DirectoryError::AccountNotFound(query())),
            (Some(account), 0) => Ok(account.clone()),
            (Some(_), rest) => Err(DirectoryError::AmbiguousAccount {
                query: query(),
                count: rest + 1,
            }),
        }
    }
}
