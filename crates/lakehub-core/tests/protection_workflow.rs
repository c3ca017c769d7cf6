//! Resource-link protection under contention and failure

use lakehub_common::protection::{PROTECT_RESOURCE_LINKS_SID, protected_resources};
use lakehub_common::{LockKey, LockScope, PolicyDocument, Stage, Statement};
use lakehub_core::locks::{InMemoryLocksTable, LockService};
use lakehub_core::protection::{
    InMemoryPolicyStore, ProtectionEdit, ProtectionError, update_protection,
};
use lakehub_core::response::ApiError;
use lakehub_test_utils::test_request_id;
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;

const PRINCIPAL: &str = "arn:aws:iam::111111111111:role/lakehub/api";

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn invocation(table: &InMemoryLocksTable) -> LockService<InMemoryLocksTable> {
    let service = LockService::with_stale_after(table.clone(), Duration::from_secs(900));
    service.set_request_id(test_request_id());
    service
}

fn catalog_key() -> LockKey {
    LockKey::new("333333333333", LockScope::GlueSyncResource)
        .with_region("eu-central-1")
        .with_stage(Stage::Prod)
}

fn foreign_statement() -> Statement {
    let mut statement = Statement::new();
    statement.insert("Sid".into(), json!("AllowConsumerRead"));
    statement.insert("Effect".into(), json!("Allow"));
    statement.insert("Action".into(), json!(["glue:GetTable"]));
    statement.insert(
        "Principal".into(),
        json!({"AWS": ["arn:aws:iam::444444444444:root"]}),
    );
    statement.insert("Resource".into(), json!("*"));
    statement
}

async fn apply(
    locks: &LockService<InMemoryLocksTable>,
    store: &InMemoryPolicyStore,
    edit: ProtectionEdit,
) -> Result<(), ProtectionError> {
    update_protection(locks, store, &catalog_key(), PRINCIPAL, &edit, || async {
        Ok(())
    })
    .await
}

#[tokio::test]
async fn protect_and_unprotect_keep_foreign_statements() {
    let table = InMemoryLocksTable::new();
    let locks = invocation(&table);
    let initial = PolicyDocument::glue(vec![foreign_statement()]).unwrap();
    let store = InMemoryPolicyStore::new("catalog 333333333333", Some(initial.clone()));

    apply(&locks, &store, ProtectionEdit::Protect(set(&["db1", "db2"]))).await.unwrap();
    let policy = store.policy().unwrap();
    assert_eq!(policy.statements()[0], foreign_statement());
    assert_eq!(protected_resources(&policy), set(&["db1", "db2"]));

    apply(&locks, &store, ProtectionEdit::Unprotect(set(&["db1"]))).await.unwrap();
    assert_eq!(protected_resources(&store.policy().unwrap()), set(&["db2"]));

    apply(&locks, &store, ProtectionEdit::Unprotect(set(&["db2"]))).await.unwrap();
    let policy = store.policy().unwrap();
    assert!(!policy.has_statement_with_sid(PROTECT_RESOURCE_LINKS_SID));
    assert_eq!(policy, initial);
    assert_eq!(locks.finish_request(), 0);
}

#[tokio::test]
async fn unprotecting_unknown_resources_writes_nothing() {
    let table = InMemoryLocksTable::new();
    let locks = invocation(&table);
    let store = InMemoryPolicyStore::new("catalog", None);

    apply(&locks, &store, ProtectionEdit::Unprotect(set(&["db1"]))).await.unwrap();
    assert_eq!(store.writes(), 0);
    assert!(store.policy().is_none());
}

#[tokio::test]
async fn held_lock_blocks_the_edit() {
    let table = InMemoryLocksTable::new();
    let holder = invocation(&table);
    let held = holder.acquire_lock(&catalog_key()).await.unwrap();

    let locks = invocation(&table);
    let store = InMemoryPolicyStore::new("catalog", None);
    let err = apply(&locks, &store, ProtectionEdit::Protect(set(&["db1"])))
        .await
        .unwrap_err();

    assert!(matches!(err, ProtectionError::Lock(_)));
    assert_eq!(ApiError::from(&err).status(), 423);
    assert_eq!(store.writes(), 0);

    holder.release_lock(&held).await.unwrap();
}

#[tokio::test]
async fn failed_body_rolls_back_to_the_fetched_policy() {
    let table = InMemoryLocksTable::new();
    let locks = invocation(&table);
    let initial = PolicyDocument::glue(vec![foreign_statement()]).unwrap();
    let store = InMemoryPolicyStore::new("catalog", Some(initial.clone()));

    let result: Result<(), anyhow::Error> = update_protection(
        &locks,
        &store,
        &catalog_key(),
        PRINCIPAL,
        &ProtectionEdit::Protect(set(&["db1"])),
        || async { anyhow::bail!("creating the resource link failed") },
    )
    .await;

    assert_eq!(
        result.unwrap_err().to_string(),
        "creating the resource link failed"
    );
    assert_eq!(store.policy(), Some(initial));
    assert_eq!(store.writes(), 2);
    assert!(table.is_empty());
}
