//! Wire types for the master's HTTP surface
//!
//! All bodies are JSON; monetary values are `{currency, microUnits}`
//! pairs; account keys are colon-joined strings.

use adbank_core::{AccountKey, Amount};
use adbank_ledger::AccountType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub key: AccountKey,
    #[serde(rename = "type")]
    pub account_type: AccountType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetMode {
    #[default]
    Set,
    Add,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetRequest {
    pub amount: Amount,
    #[serde(default)]
    pub mode: BudgetMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceRequest {
    pub desired_balance: Amount,
    #[serde(default)]
    pub max_throttle: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub child_key: AccountKey,
    pub amount: Amount,
}

/// Structured error reply with a stable kind tag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
