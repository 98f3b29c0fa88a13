//! BankerClient - the slave's and controller's view of the master
//!
//! A capability trait so edges can talk to an in-process master (tests,
//! embedded deployments) or a remote one over HTTP without caring which.

use adbank_core::{AccountKey, Amount};
use adbank_ledger::{Account, AccountSummary, AccountType, LedgerError, SpendReport};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::master::MasterBanker;

/// Errors from a master request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The request never reached the master (or the reply was lost).
    /// Retryable: spend reports are idempotent.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    /// The master processed the request and said no
    #[error("{kind}: {message}")]
    Rejected { kind: String, message: String },
}

impl ClientError {
    /// Timeouts and transport failures may be retried with the same
    /// payload; rejections may not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::Timeout)
    }
}

impl From<LedgerError> for ClientError {
    fn from(err: LedgerError) -> Self {
        ClientError::Rejected {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Request surface the master exposes to slaves and controllers
#[async_trait]
pub trait BankerClient: Send + Sync {
    async fn create_account(
        &self,
        key: &AccountKey,
        account_type: AccountType,
    ) -> Result<Account, ClientError>;

    async fn account(&self, key: &AccountKey) -> Result<Account, ClientError>;

    async fn subtree(
        &self,
        key: &AccountKey,
    ) -> Result<BTreeMap<AccountKey, Account>, ClientError>;

    async fn set_budget(&self, key: &AccountKey, amount: &Amount) -> Result<Account, ClientError>;

    async fn add_budget(&self, key: &AccountKey, amount: &Amount) -> Result<Account, ClientError>;

    async fn transfer_budget(
        &self,
        parent: &AccountKey,
        child: &AccountKey,
        amount: &Amount,
    ) -> Result<Account, ClientError>;

    async fn set_balance(
        &self,
        key: &AccountKey,
        desired: &Amount,
        max_throttle: Option<i64>,
    ) -> Result<Account, ClientError>;

    async fn report_spend(
        &self,
        key: &AccountKey,
        report: &SpendReport,
    ) -> Result<Account, ClientError>;

    async fn close_account(&self, key: &AccountKey) -> Result<Account, ClientError>;

    async fn summary(&self) -> Result<BTreeMap<AccountKey, AccountSummary>, ClientError>;
}

/// In-process client: calls the master directly. Used by tests and by
/// deployments that co-locate a router with the master.
pub struct LocalBankerClient {
    master: Arc<MasterBanker>,
}

impl LocalBankerClient {
    pub fn new(master: Arc<MasterBanker>) -> Self {
        Self { master }
    }
}

#[async_trait]
impl BankerClient for LocalBankerClient {
    async fn create_account(
        &self,
        key: &AccountKey,
        account_type: AccountType,
    ) -> Result<Account, ClientError> {
        Ok(self.master.create_account(key, account_type)?)
    }

    async fn account(&self, key: &AccountKey) -> Result<Account, ClientError> {
        self.master
            .account(key)
            .ok_or_else(|| LedgerError::UnknownAccount(key.clone()).into())
    }

    async fn subtree(
        &self,
        key: &AccountKey,
    ) -> Result<BTreeMap<AccountKey, Account>, ClientError> {
        let subtree = self.master.subtree(key);
        if subtree.is_empty() {
            return Err(LedgerError::UnknownAccount(key.clone()).into());
        }
        Ok(subtree)
    }

    async fn set_budget(&self, key: &AccountKey, amount: &Amount) -> Result<Account, ClientError> {
        Ok(self.master.set_budget(key, amount)?)
    }

    async fn add_budget(&self, key: &AccountKey, amount: &Amount) -> Result<Account, ClientError> {
        Ok(self.master.add_budget(key, amount)?)
    }

    async fn transfer_budget(
        &self,
        parent: &AccountKey,
        child: &AccountKey,
        amount: &Amount,
    ) -> Result<Account, ClientError> {
        Ok(self.master.transfer_budget(parent, child, amount)?)
    }

    async fn set_balance(
        &self,
        key: &AccountKey,
        desired: &Amount,
        max_throttle: Option<i64>,
    ) -> Result<Account, ClientError> {
        Ok(self.master.set_balance(key, desired, max_throttle)?)
    }

    async fn report_spend(
        &self,
        key: &AccountKey,
        report: &SpendReport,
    ) -> Result<Account, ClientError> {
        Ok(self.master.report_spend(key, report)?)
    }

    async fn close_account(&self, key: &AccountKey) -> Result<Account, ClientError> {
        Ok(self.master.close_account(key)?)
    }

    async fn summary(&self) -> Result<BTreeMap<AccountKey, AccountSummary>, ClientError> {
        Ok(self.master.summary())
    }
}
