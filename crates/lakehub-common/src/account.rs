//! Account model shared by the directory and the session broker

use serde::{Deserialize, Serialize};
use std::fmt;

/// Strongly-typed AWS account ID (12-digit string)
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::Deref,
)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        AccountId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// AWS account ids are exactly twelve ASCII digits
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == 12 && self.0.bytes().all(|b| b.is_ascii_digit())
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        AccountId(s.to_string())
    }
}

/// AWS partition, e.g. `aws` or `aws-cn`
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(transparent)]
pub struct Partition(String);

impl Partition {
    pub fn new(name: impl Into<String>) -> Self {
        Partition(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Partition {
    fn default() -> Self {
        Partition("aws".to_string())
    }
}

/// Deployment environment of the control plane, e.g. `prod`
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(transparent)]
pub struct Environment(String);

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Environment(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What an account is used for, e.g. `api` or `resources`
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(transparent)]
pub struct AccountPurpose(String);

impl AccountPurpose {
    /// Purpose of the account the control plane itself runs in
    pub fn api() -> Self {
        AccountPurpose("api".to_string())
    }

    pub fn new(name: impl Into<String>) -> Self {
        AccountPurpose(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A hub groups accounts and pins them to one partition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hub {
    pub name: String,
    pub partition: Partition,
}

impl Hub {
    pub fn new(name: impl Into<String>, partition: Partition) -> Self {
        Self {
            name: name.into(),
            partition,
        }
    }
}

impl fmt::Display for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Usage type of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// Accounts operated by the platform team
    Internal,
    Provider,
    /// Tooling accounts that neither provide nor consume data
    Technical,
    Usecase,
}

impl AccountType {
    /// Whether accounts of this type are bootstrapped with a metadata role
    pub fn supports_metadata_role(self) -> bool {
        !matches!(self, AccountType::Technical)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccountType::Internal => "internal",
            AccountType::Provider => "provider",
            AccountType::Technical => "technical",
            AccountType::Usecase => "usecase",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An account record as returned by the account directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub purpose: AccountPurpose,
    pub hub: Hub,
    pub environment: Environment,
    pub account_type: AccountType,
}

impl Account {
    pub fn partition(&self) -> &Partition {
        &self.hub.partition
    }
}

/// Which account's metadata role to assume
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssumableAccountSpec {
    pub account_id: AccountId,
    pub hub: Hub,
    pub account_type: AccountType,
}

impl AssumableAccountSpec {
    pub fn new(account_id: AccountId, hub: Hub, account_type: AccountType) -> Self {
        Self {
            account_id,
            hub,
            account_type,
        }
    }

    pub fn from_account(account: &Account) -> Self {
        Self::new(account.id.clone(), account.hub.clone(), account.account_type)
    }

    /// Spec for an account whose type is about to change
    ///
    /// A pending type update wins over the stored type, so the broker
    /// judges role support against the state the account is moving to.
    pub fn from_account_with_type(account: &Account, new_type: Option<AccountType>) -> Self {
        Self::new(
            account.id.clone(),
            account.hub.clone(),
            new_type.unwrap_or(account.account_type),
        )
    }

    pub fn supports_metadata_role(&self) -> bool {
        self.account_type.supports_metadata_role()
    }
}

impl fmt::Display for AssumableAccountSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "account_id={}, hub={}, account_type={}",
            self.account_id, self.hub, self.account_type
        )
    }
}

/// ARN of an IAM role
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(transparent)]
pub struct RoleArn(String);

impl RoleArn {
    /// Build `arn:{partition}:iam::{account}:role{path}{name}`
    ///
    /// `path` must start and end with `/`; IAM uses `/` for the root path.
    pub fn new(partition: &Partition, account_id: &AccountId, path: &str, name: &str) -> Self {
        RoleArn(format!("arn:{partition}:iam::{account_id}:role{path}{name}"))
    }

    pub fn parse(arn: impl Into<String>) -> Self {
        RoleArn(arn.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Account id embedded in the ARN, if the ARN is well formed
    pub fn account_id(&self) -> Option<AccountId> {
        self.0.split(':').nth(4).filter(|s| !s.is_empty()).map(AccountId::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(account_type: AccountType) -> Account {
        Account {
            id: AccountId::new("111122223333"),
            purpose: AccountPurpose::new("resources"),
            hub: Hub::new("global", Partition::default()),
            environment: Environment::new("prod"),
            account_type,
        }
    }

    #[test]
    fn technical_accounts_have_no_metadata_role() {
        assert!(!AccountType::Technical.supports_metadata_role());
        assert!(AccountType::Internal.supports_metadata_role());
        assert!(AccountType::Provider.supports_metadata_role());
        assert!(AccountType::Usecase.supports_metadata_role());
    }

    #[test]
    fn spec_from_account_copies_identity() {
        let spec = AssumableAccountSpec::from_account(&account(AccountType::Provider));
        assert_eq!(spec.account_id.as_str(), "111122223333");
        assert_eq!(spec.hub.name, "global");
        assert_eq!(spec.account_type, AccountType::Provider);
    }

    #[test]
    fn pending_type_update_wins() {
        let acc = account(AccountType::Usecase);
        let spec = AssumableAccountSpec::from_account_with_type(&acc, Some(AccountType::Technical));
        assert!(!spec.supports_metadata_role());

        let unchanged = AssumableAccountSpec::from_account_with_type(&acc, None);
        assert_eq!(unchanged.account_type, AccountType::Usecase);
    }

    #[test]
    fn role_arn_format() {
        let arn = RoleArn::new(
            &Partition::new("aws-cn"),
            &AccountId::new("111122223333"),
            "/lakehub/",
            "lakehub-assumable-metadata",
        );
        assert_eq!(
            arn.as_str(),
            "arn:aws-cn:iam::111122223333:role/lakehub/lakehub-assumable-metadata"
        );
        assert_eq!(arn.account_id(), Some(AccountId::new("111122223333")));
    }

    #[test]
    fn account_id_validation() {
        assert!(AccountId::new("123456789012").is_well_formed());
        assert!(!AccountId::new("12345").is_well_formed());
        assert!(!AccountId::new("12345678901a").is_well_formed());
    }

    #[test]
    fn account_type_serde_is_lowercase() {
        let json = serde_json::to_string(&AccountType::Usecase).unwrap();
        assert_eq!(json, "\"usecase\"");
    }
}
