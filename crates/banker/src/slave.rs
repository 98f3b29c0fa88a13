//! SlaveBanker - the edge cache that makes bid authorization local
//!
//! A slave owns one leaf-family of the master's tree. It checks out float
//! via `setBalance`, authorizes bids against its shadow copy with no
//! master round-trip, and ships its accumulated counters back on a
//! periodic sync. Because the counters are cumulative and monotone, a
//! lost or repeated report is harmless; an unsynced crash loses at most
//! one interval of in-flight commitments, which the master's staleness
//! sweep reclaims.

use adbank_core::{AccountKey, Amount};
use adbank_ledger::{
    Account, AccountType, Accounts, CommitmentToken, LedgerError, SpendReport,
};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::{BankerClient, ClientError};
use crate::config::BankerConfig;

/// The edge banker
pub struct SlaveBanker {
    client: Arc<dyn BankerClient>,
    shadow: Accounts,
    config: BankerConfig,
    /// Float target per owned account
    targets: Mutex<HashMap<AccountKey, Amount>>,
}

impl SlaveBanker {
    pub fn new(client: Arc<dyn BankerClient>, config: BankerConfig) -> Self {
        Self {
            client,
            shadow: Accounts::new(),
            config,
            targets: Mutex::new(HashMap::new()),
        }
    }

    /// Take ownership of a spend account: create it on the master if
    /// needed, seed the shadow from the master's record and pull the
    /// initial float.
    pub async fn add_account(
        &self,
        key: &AccountKey,
        float_target: Amount,
    ) -> Result<(), ClientError> {
        let record = self
            .client
            .create_account(key, AccountType::Spend)
            .await?;
        self.shadow.adopt_master_record(key, &record);
        self.lock_targets().insert(key.clone(), float_target);
        info!(%key, "slave took ownership of account");

        self.sync_account(key).await
    }

    pub fn owned_accounts(&self) -> Vec<AccountKey> {
        self.lock_targets().keys().cloned().collect()
    }

    /// The local cached view (tests and diagnostics)
    pub fn shadow(&self) -> &Accounts {
        &self.shadow
    }

    // ----- local authorization (no master round-trip) ----------------------

    /// Reserve funds against the local float. `InsufficientFunds` here
    /// means the float is exhausted; callers may retry after the next sync.
    pub fn authorize_bid(
        &self,
        key: &AccountKey,
        bid_id: &str,
        amount: &Amount,
    ) -> Result<CommitmentToken, LedgerError> {
        self.shadow.authorize_bid(key, bid_id, amount, Utc::now())
    }

    /// Settle a local authorization (win: `paid > 0`, loss: `paid = 0`).
    /// Only tokens issued by this slave are known here, which is what
    /// keeps commits causally after their authorizations.
    pub fn commit_bid(
        &self,
        token: &CommitmentToken,
        paid: &Amount,
        line_items: &BTreeMap<String, Amount>,
    ) -> Result<Account, LedgerError> {
        self.shadow.commit_bid(token, paid, line_items)
    }

    pub fn cancel_bid(&self, token: &CommitmentToken) -> Result<Account, LedgerError> {
        self.shadow.cancel_bid(token)
    }

    // ----- sync loop -------------------------------------------------------

    /// One sync round for one account: ship the cumulative counters, merge
    /// the refreshed master record back, then re-arm the float.
    pub async fn sync_account(&self, key: &AccountKey) -> Result<(), ClientError> {
        let local = self.shadow.account(key).ok_or_else(|| ClientError::Rejected {
            kind: "UnknownAccount".to_string(),
            message: format!("{key} is not owned by this slave"),
        })?;

        let report = SpendReport::from_account(&local);
        let refreshed = self.client.report_spend(key, &report).await?;
        self.shadow.adopt_master_record(key, &refreshed);

        let target = self.lock_targets().get(key).cloned();
        if let Some(target) = target {
            let refreshed = self.client.set_balance(key, &target, None).await?;
            self.shadow.adopt_master_record(key, &refreshed);
        }

        debug!(%key, "slave sync round complete");
        Ok(())
    }

    /// Sync every owned account. Transport failures are retried on the
    /// next tick with the same cumulative snapshot (idempotent); anything
    /// else is an operator problem and is logged as such.
    pub async fn sync_all(&self) {
        for key in self.owned_accounts() {
            if let Err(err) = self.sync_account(&key).await {
                if err.is_retryable() {
                    warn!(%key, error = %err, "sync failed, will retry next interval");
                } else {
                    error!(%key, error = %err, "sync rejected by master");
                }
            }
        }
    }

    /// Spawn the periodic sync task
    pub fn run_sync_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let slave = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(slave.config.sync_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                slave.sync_all().await;
            }
        })
    }

    fn lock_targets(&self) -> std::sync::MutexGuard<'_, HashMap<AccountKey, Amount>> {
        self.targets.lock().expect("targets lock poisoned")
    }
}
