//! BudgetController - the operator's surface
//!
//! Thin wrappers that issue the corresponding master request and block
//! for the reply.

use adbank_core::{AccountKey, Amount};
use adbank_ledger::Account;
use std::sync::Arc;

use crate::client::{BankerClient, ClientError};

pub struct BudgetController {
    client: Arc<dyn BankerClient>,
}

impl BudgetController {
    pub fn new(client: Arc<dyn BankerClient>) -> Self {
        Self { client }
    }

    /// Set a top-level budget to an absolute target
    pub async fn set_budget_sync(
        &self,
        key: &AccountKey,
        amount: &Amount,
    ) -> Result<Account, ClientError> {
        self.client.set_budget(key, amount).await
    }

    /// Add to (or, negative, return from) a top-level budget
    pub async fn add_budget_sync(
        &self,
        key: &AccountKey,
        amount: &Amount,
    ) -> Result<Account, ClientError> {
        self.client.add_budget(key, amount).await
    }

    /// Move funds from a parent's available into a direct child
    pub async fn topup_transfer_sync(
        &self,
        parent: &AccountKey,
        child: &AccountKey,
        amount: &Amount,
    ) -> Result<Account, ClientError> {
        self.client.transfer_budget(parent, child, amount).await
    }
}
