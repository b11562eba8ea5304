use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::secrets::EncryptedSecret;

/// The optimistic-concurrency aggregate: one user row with its accounts embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub version: u64,
    pub created: i64,
    pub updated: i64,
    /// Count of schema migrations applied. Rows written before migrations
    /// existed have no such field and deserialize as 0.
    #[serde(default)]
    pub migration_number: usize,
    #[serde(default)]
    pub accounts: BTreeMap<String, Account>,
}

impl User {
    pub fn new(id: &str, now_ms: i64, migration_number: usize) -> Self {
        Self {
            id: id.to_string(),
            version: 1,
            created: now_ms,
            updated: now_ms,
            migration_number,
            accounts: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub name: String,
    pub description: String,
    pub version: u64,
    pub created: i64,
    pub updated: i64,
    #[serde(default)]
    pub archived: bool,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ens_name: Option<String>,
}

/// Input for account creation. Shape validation happens upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountParams {
    pub name: String,
    pub description: String,
    pub encrypted_json: EncryptedSecret,
    #[serde(default)]
    pub ens_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountParams {
    pub name: String,
    pub description: String,
    /// The account version the caller last observed.
    #[serde(rename = "version")]
    pub expected_version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedAccount {
    pub account_id: String,
    pub account: Account,
}

/// Presentation record for one account, keyed by its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: u64,
    pub created: i64,
    pub updated: i64,
    pub address: String,
    pub ens_name: Option<String>,
}

impl AccountView {
    pub fn from_account(id: &str, account: &Account) -> Self {
        Self {
            id: id.to_string(),
            name: account.name.clone(),
            description: account.description.clone(),
            version: account.version,
            created: account.created,
            updated: account.updated,
            address: account.address.clone(),
            ens_name: account.ens_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountWithSecret {
    #[serde(flatten)]
    pub account: AccountView,
    pub encrypted_json: EncryptedSecret,
}

/// Derive the stored address from the hex address carried in a wallet secret.
pub fn derive_address(secret_address: &str) -> String {
    let lowered = secret_address.trim().to_ascii_lowercase();
    match lowered.strip_prefix("0x") {
        Some(rest) => format!("0x{rest}"),
        None => format!("0x{lowered}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_user_without_migration_number_reads_as_zero() {
        let raw = serde_json::json!({
            "id": "legacy",
            "version": 4,
            "created": 1,
            "updated": 2,
            "accounts": {}
        });
        let user: User = serde_json::from_value(raw).expect("legacy user should decode");
        assert_eq!(user.migration_number, 0);
        assert_eq!(user.version, 4);
    }

    #[test]
    fn account_serializes_camel_case_and_omits_missing_ens_name() {
        let account = Account {
            name: "Main".to_string(),
            description: "d".to_string(),
            version: 1,
            created: 10,
            updated: 10,
            archived: false,
            address: "0xabc".to_string(),
            ens_name: None,
        };
        let value = serde_json::to_value(&account).expect("account should encode");
        assert_eq!(value["archived"], serde_json::json!(false));
        assert!(value.get("ensName").is_none());
    }

    #[test]
    fn derive_address_lowercases_and_prefixes() {
        assert_eq!(derive_address("ABCDEF"), "0xabcdef");
        assert_eq!(derive_address("0xABCDEF"), "0xabcdef");
    }
}
