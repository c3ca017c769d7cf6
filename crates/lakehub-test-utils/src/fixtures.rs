//! Account fixtures

use lakehub_common::{
    Account, AccountId, AccountPurpose, AccountType, Environment, Hub, Partition,
};

pub const TEST_ENVIRONMENT: &str = "test";
pub const API_ACCOUNT_ID: &str = "111111111111";
pub const API_ACCOUNT_ID_CN: &str = "222222222222";

fn hub(partition: &str) -> Hub {
    Hub::new("global", Partition::new(partition))
}

/// The control plane's api account in `partition`
pub fn api_account(id: &str, partition: &str) -> Account {
    Account {
        id: AccountId::new(id),
        purpose: AccountPurpose::api(),
        hub: hub(partition),
        environment: Environment::new(TEST_ENVIRONMENT),
        account_type: AccountType::Internal,
    }
}

/// A managed account of `account_type` in the `aws` partition
pub fn managed_account(id: &str, account_type: AccountType) -> Account {
    Account {
        id: AccountId::new(id),
        purpose: AccountPurpose::new("resources"),
        hub: hub("aws"),
        environment: Environment::new(TEST_ENVIRONMENT),
        account_type,
    }
}

/// A small directory population: api accounts in two partitions plus one
/// managed account per account type
pub struct TestAccounts;

impl TestAccounts {
    pub fn all() -> Vec<Account> {
        vec![
            api_account(API_ACCOUNT_ID, "aws"),
            api_account(API_ACCOUNT_ID_CN, "aws-cn"),
            managed_account("333333333333", AccountType::Provider),
            managed_account("444444444444", AccountType::Usecase),
            managed_account("555555555555", AccountType::Technical),
            managed_account("666666666666", AccountType::Internal),
        ]
    }

    pub fn provider() -> Account {
        managed_account("333333333333", AccountType::Provider)
    }

    pub fn technical() -> Account {
        managed_account("555555555555", AccountType::Technical)
    }

    pub fn environment() -> Environment {
        Environment::new(TEST_ENVIRONMENT)
    }
}
