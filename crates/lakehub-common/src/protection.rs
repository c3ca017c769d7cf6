//! Delete protection for catalog resource links
//!
//! A single Deny statement, identified by [`PROTECT_RESOURCE_LINKS_SID`],
//! guards a set of databases from `glue:DeleteDatabase`. The set is read from
//! that statement's `Resource` field and never stored anywhere else.
//!
//! The edit helpers return `None` when the requested change is already in
//! effect, so callers can skip the remote write.

use crate::policy::{PolicyDocument, PolicyError, Statement, string_set};
use serde_json::json;
use std::collections::BTreeSet;

/// Sid of the statement guarding resource links against deletion
pub const PROTECT_RESOURCE_LINKS_SID: &str = "ResourceLinkDeleteDenyManagedByLakehub";

/// Action denied by the guard statement
pub const PROTECTED_ACTION: &str = "glue:DeleteDatabase";

/// Resources currently guarded by the protection statement
pub fn protected_resources(doc: &PolicyDocument) -> BTreeSet<String> {
    doc.get_statement_by_sid(PROTECT_RESOURCE_LINKS_SID)
        .ok()
        .and_then(|statement| statement.get("Resource"))
        .map(string_set)
        .unwrap_or_default()
}

/// Build the guard statement for `principal` over `resources`
///
/// Resources are written in sorted order so equal sets encode identically.
pub fn protection_statement(principal: &str, resources: &BTreeSet<String>) -> Statement {
    let mut statement = Statement::new();
    statement.insert("Sid".into(), json!(PROTECT_RESOURCE_LINKS_SID));
    statement.insert("Effect".into(), json!("Deny"));
    statement.insert("Action".into(), json!([PROTECTED_ACTION]));
    statement.insert("Principal".into(), json!({"AWS": [principal]}));
    statement.insert("Resource".into(), json!(resources));
    statement
}

/// Union `resources` into the guarded set
///
/// Returns `Ok(None)` if every resource is already guarded.
pub fn add_protection(
    doc: &PolicyDocument,
    principal: &str,
    resources: &BTreeSet<String>,
) -> Result<Option<PolicyDocument>, PolicyError> {
    if resources.is_empty() {
        return Ok(None);
    }
    let current = protected_resources(doc);
    if resources.is_subset(&current) {
        return Ok(None);
    }
    let merged: BTreeSet<String> = current.union(resources).cloned().collect();
    doc.add_or_update_statement(protection_statement(principal, &merged))
        .map(Some)
}

/// Remove `resources` from the guarded set
///
/// Returns `Ok(None)` if none of them is currently guarded. Once the set
/// becomes empty the guard statement is dropped entirely; a Deny statement
/// with no resources is never written.
pub fn remove_protection(
    doc: &PolicyDocument,
    principal: &str,
    resources: &BTreeSet<String>,
) -> Result<Option<PolicyDocument>, PolicyError> {
    if resources.is_empty() || !doc.has_statement_with_sid(PROTECT_RESOURCE_LINKS_SID) {
        return Ok(None);
    }
    let current = protected_resources(doc);
    if current.is_disjoint(resources) {
        return Ok(None);
    }
    let remaining: BTreeSet<String> = current.difference(resources).cloned().collect();
    let edited = if remaining.is_empty() {
        doc.delete_statement_if_present(PROTECT_RESOURCE_LINKS_SID)?
    } else {
        doc.add_or_update_statement(protection_statement(principal, &remaining))?
    };
    Ok(Some(edited))
}
