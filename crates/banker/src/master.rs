//! MasterBanker - the authoritative banker service
//!
//! Hosts the one true account tree, applies slave deltas, snapshots the
//! tree to the persistence backend on an interval and reclaims commitments
//! whose owning slave has gone silent.

use adbank_core::{AccountKey, Amount};
use adbank_ledger::{
    summary, Account, AccountSummary, AccountType, Accounts, LedgerError, SpendReport,
    StaleCommitment,
};
use adbank_persistence::{BankerPersistence, PersistenceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BankerConfig;

/// Health indicator served on the monitor surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub accounts: usize,
    pub last_save_at: Option<DateTime<Utc>>,
    pub last_save_status: String,
    pub invariant_violations: Vec<String>,
    /// Most recent spend report per top-level account
    pub last_report_at: BTreeMap<String, DateTime<Utc>>,
}

#[derive(Debug, Clone)]
enum SaveStatus {
    NeverSaved,
    Success,
    Failed(String),
}

struct SaveState {
    last_saved_at: Option<DateTime<Utc>>,
    status: SaveStatus,
}

/// The authoritative banker
pub struct MasterBanker {
    accounts: Arc<Accounts>,
    storage: Arc<dyn BankerPersistence>,
    config: BankerConfig,
    started_at: DateTime<Utc>,
    saving: AtomicBool,
    save_state: Mutex<SaveState>,
    /// When each account's owning slave last reported
    last_report: Mutex<HashMap<AccountKey, DateTime<Utc>>>,
}

impl MasterBanker {
    /// Load the registry from storage and start from it. Blocks until the
    /// backend answers; a `DataInconsistency` refuses to start.
    pub async fn load(
        config: BankerConfig,
        storage: Arc<dyn BankerPersistence>,
    ) -> Result<Self, PersistenceError> {
        let accounts = storage.load_all(&config.top_level_key).await?;
        info!(
            namespace = %config.top_level_key,
            accounts = accounts.len(),
            "master banker state loaded"
        );
        Ok(Self {
            accounts: Arc::new(accounts),
            storage,
            config,
            started_at: Utc::now(),
            saving: AtomicBool::new(false),
            save_state: Mutex::new(SaveState {
                last_saved_at: None,
                status: SaveStatus::NeverSaved,
            }),
            last_report: Mutex::new(HashMap::new()),
        })
    }

    /// A master over an existing registry (tests)
    pub fn with_accounts(
        config: BankerConfig,
        storage: Arc<dyn BankerPersistence>,
        accounts: Accounts,
    ) -> Self {
        Self {
            accounts: Arc::new(accounts),
            storage,
            config,
            started_at: Utc::now(),
            saving: AtomicBool::new(false),
            save_state: Mutex::new(SaveState {
                last_saved_at: None,
                status: SaveStatus::NeverSaved,
            }),
            last_report: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BankerConfig {
        &self.config
    }

    pub fn accounts(&self) -> &Accounts {
        &self.accounts
    }

    // ----- request surface -------------------------------------------------

    pub fn create_account(
        &self,
        key: &AccountKey,
        account_type: AccountType,
    ) -> Result<Account, LedgerError> {
        let account = self.accounts.create_account(key, account_type)?;
        info!(%key, account_type = %account_type, "account created");
        Ok(account)
    }

    pub fn account(&self, key: &AccountKey) -> Option<Account> {
        self.accounts.account(key)
    }

    pub fn subtree(&self, key: &AccountKey) -> BTreeMap<AccountKey, Account> {
        self.accounts.subtree(key)
    }

    pub fn set_budget(&self, key: &AccountKey, amount: &Amount) -> Result<Account, LedgerError> {
        let account = self.accounts.set_budget(key, amount)?;
        info!(%key, %amount, "budget set");
        Ok(account)
    }

    pub fn add_budget(&self, key: &AccountKey, amount: &Amount) -> Result<Account, LedgerError> {
        let account = self.accounts.add_budget(key, amount)?;
        info!(%key, %amount, "budget added");
        Ok(account)
    }

    pub fn transfer_budget(
        &self,
        parent: &AccountKey,
        child: &AccountKey,
        amount: &Amount,
    ) -> Result<Account, LedgerError> {
        let account = self.accounts.transfer_budget(parent, child, amount)?;
        info!(%parent, %child, %amount, "budget transferred");
        Ok(account)
    }

    pub fn set_balance(
        &self,
        key: &AccountKey,
        desired: &Amount,
        max_throttle: Option<i64>,
    ) -> Result<Account, LedgerError> {
        let throttle = max_throttle.unwrap_or(self.config.default_max_throttle);
        self.accounts.set_balance(key, desired, throttle)
    }

    /// Apply a slave's cumulative counters and remember when we last heard
    /// from this account's owner. Idempotent under replay.
    pub fn report_spend(
        &self,
        key: &AccountKey,
        report: &SpendReport,
    ) -> Result<Account, LedgerError> {
        let account = self.accounts.apply_spend_report(key, report)?;
        self.lock_last_report().insert(key.clone(), Utc::now());
        Ok(account)
    }

    pub fn close_account(&self, key: &AccountKey) -> Result<Account, LedgerError> {
        let account = self.accounts.close_account(key)?;
        info!(%key, "account closed");
        Ok(account)
    }

    pub fn summary(&self) -> BTreeMap<AccountKey, AccountSummary> {
        summary(&self.accounts)
    }

    // ----- persistence -----------------------------------------------------

    /// Save the entire state. A save already in progress wins; the next
    /// interval tick picks up whatever it missed.
    pub async fn save_state(&self) {
        if self.saving.swap(true, Ordering::AcqRel) {
            debug!("snapshot save already in progress, skipping");
            return;
        }

        let result = self
            .storage
            .save_all(&self.config.top_level_key, &self.accounts)
            .await;
        self.on_state_saved(result);
        self.saving.store(false, Ordering::Release);
    }

    fn on_state_saved(&self, result: Result<(), PersistenceError>) {
        let mut state = self.lock_save_state();
        match result {
            Ok(()) => {
                state.last_saved_at = Some(Utc::now());
                state.status = SaveStatus::Success;
                debug!("registry snapshot saved");
            }
            Err(err) => {
                state.status = SaveStatus::Failed(err.to_string());
                error!(error = %err, "registry snapshot save failed");
            }
        }
    }

    // ----- staleness -------------------------------------------------------

    /// Reclaim dead reservations: pending commitments past the TTL, plus
    /// the remaining in-flight of accounts whose owning slave has not
    /// reported within the TTL.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<StaleCommitment> {
        let ttl = self.config.staleness_ttl();
        let swept = self.accounts.sweep_stale(ttl, now);

        let silent: Vec<AccountKey> = {
            let last_report = self.lock_last_report();
            last_report
                .iter()
                .filter(|(_, &at)| at + ttl <= now)
                .map(|(key, _)| key.clone())
                .collect()
        };
        for key in silent {
            match self.accounts.account(&key) {
                Some(account) if !account.in_flight().is_zero() => {
                    match self.accounts.reclaim_in_flight(&key) {
                        Ok(reclaimed) => warn!(
                            %key,
                            reclaimed = %reclaimed,
                            "slave silent past staleness timeout, in-flight reclaimed"
                        ),
                        Err(err) => error!(%key, error = %err, "in-flight reclaim failed"),
                    }
                    self.lock_last_report().remove(&key);
                }
                _ => {}
            }
        }
        swept
    }

    // ----- health ----------------------------------------------------------

    /// Healthy iff the last save is recent enough, succeeded, and the
    /// registry invariants hold.
    pub fn health(&self) -> HealthReport {
        let violations: Vec<String> = self
            .accounts
            .check_invariants()
            .iter()
            .map(|k| k.to_string())
            .collect();

        let state = self.lock_save_state();
        let deadline = chrono::Duration::seconds(2 * self.config.save_interval_secs as i64);
        let last_activity = state.last_saved_at.unwrap_or(self.started_at);
        let save_fresh = Utc::now() - last_activity <= deadline;
        let (save_ok, status_text) = match &state.status {
            SaveStatus::NeverSaved => (true, "never saved".to_string()),
            SaveStatus::Success => (true, "success".to_string()),
            SaveStatus::Failed(info) => (false, format!("failed: {info}")),
        };

        let last_report_at = self
            .lock_last_report()
            .iter()
            .map(|(key, &at)| (key.top_level().to_string(), at))
            .fold(BTreeMap::new(), |mut acc: BTreeMap<String, DateTime<Utc>>, (key, at)| {
                let entry = acc.entry(key).or_insert(at);
                if at > *entry {
                    *entry = at;
                }
                acc
            });

        HealthReport {
            healthy: save_fresh && save_ok && violations.is_empty(),
            accounts: self.accounts.len(),
            last_save_at: state.last_saved_at,
            last_save_status: status_text,
            invariant_violations: violations,
            last_report_at,
        }
    }

    // ----- background loops ------------------------------------------------

    /// Spawn the persistence and sweep loops. Handles are detached on drop;
    /// hold them to abort on shutdown.
    pub fn spawn_loops(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let persist = {
            let master = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(master.config.save_interval());
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    master.save_state().await;
                }
            })
        };

        let sweep = {
            let master = Arc::clone(self);
            tokio::spawn(async move {
                let period = master.config.staleness_timeout() / 2;
                let mut ticker = tokio::time::interval(period.max(std::time::Duration::from_secs(1)));
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    master.sweep(Utc::now());
                }
            })
        };

        vec![persist, sweep]
    }

    fn lock_save_state(&self) -> std::sync::MutexGuard<'_, SaveState> {
        self.save_state.lock().expect("save state lock poisoned")
    }

    fn lock_last_report(&self) -> std::sync::MutexGuard<'_, HashMap<AccountKey, DateTime<Utc>>> {
        self.last_report.lock().expect("report table lock poisoned")
    }
}
