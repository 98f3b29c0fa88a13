//! Master/slave replication: local authorization, idempotent spend
//! reports, float re-arming, staleness reclamation and the crash-loss
//! bound.

use adbank_core::{AccountKey, Amount, Currency};
use adbank_banker::{
    BankerClient, BankerConfig, BudgetController, LocalBankerClient, MasterBanker, SlaveBanker,
};
use adbank_ledger::{AccountType, Accounts};
use adbank_persistence::{BankerPersistence, NullBankerPersistence, PersistenceError};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

const DOLLAR: i64 = 1_000_000;

fn key(s: &str) -> AccountKey {
    s.parse().unwrap()
}

fn usd(dollars: i64) -> Amount {
    Amount::usd(dollars * DOLLAR)
}

async fn master_with_budget(budget: i64) -> Arc<MasterBanker> {
    let master = MasterBanker::load(BankerConfig::default(), Arc::new(NullBankerPersistence))
        .await
        .unwrap();
    master
        .create_account(&key("camp"), AccountType::Budget)
        .unwrap();
    master.set_budget(&key("camp"), &usd(budget)).unwrap();
    Arc::new(master)
}

fn slave_for(master: &Arc<MasterBanker>) -> Arc<SlaveBanker> {
    let client = Arc::new(LocalBankerClient::new(Arc::clone(master)));
    Arc::new(SlaveBanker::new(client, BankerConfig::default()))
}

#[tokio::test]
async fn slave_authorizes_locally_and_master_learns_on_sync() {
    let master = master_with_budget(100).await;
    let slave = slave_for(&master);
    slave.add_account(&key("camp:router"), usd(10)).await.unwrap();

    // Local float checked out
    let shadow = slave.shadow().account(&key("camp:router")).unwrap();
    assert_eq!(shadow.available().value(&Currency::Usd), 10 * DOLLAR);

    // Authorize and commit with no master round-trip
    let token = slave
        .authorize_bid(&key("camp:router"), "bid-1", &usd(3))
        .unwrap();
    let mut items = BTreeMap::new();
    items.insert("creative-7".to_string(), usd(2));
    slave.commit_bid(&token, &usd(2), &items).unwrap();

    // The master has seen nothing yet
    let upstream = master.account(&key("camp:router")).unwrap();
    assert!(upstream.spent.is_zero());

    slave.sync_account(&key("camp:router")).await.unwrap();

    let upstream = master.account(&key("camp:router")).unwrap();
    assert_eq!(upstream.spent.value(&Currency::Usd), 2 * DOLLAR);
    assert_eq!(upstream.commitments_made.value(&Currency::Usd), 3 * DOLLAR);
    assert_eq!(upstream.commitments_retired.value(&Currency::Usd), 3 * DOLLAR);
    assert!(master.accounts().check_invariants().is_empty());

    // Float re-armed back to the target after the spend
    let shadow = slave.shadow().account(&key("camp:router")).unwrap();
    assert_eq!(shadow.available().value(&Currency::Usd), 10 * DOLLAR);
}

#[tokio::test]
async fn replayed_sync_leaves_master_unchanged() {
    let master = master_with_budget(100).await;
    let slave = slave_for(&master);
    slave.add_account(&key("camp:router"), usd(10)).await.unwrap();

    let token = slave
        .authorize_bid(&key("camp:router"), "bid-1", &usd(4))
        .unwrap();
    slave.commit_bid(&token, &usd(4), &BTreeMap::new()).unwrap();

    slave.sync_account(&key("camp:router")).await.unwrap();
    let first = master.account(&key("camp:router")).unwrap();

    // The at-least-once case: the same counters arrive again
    slave.sync_account(&key("camp:router")).await.unwrap();
    slave.sync_account(&key("camp:router")).await.unwrap();
    let replayed = master.account(&key("camp:router")).unwrap();

    assert_eq!(first.spent, replayed.spent);
    assert_eq!(first.commitments_made, replayed.commitments_made);
    assert_eq!(first.commitments_retired, replayed.commitments_retired);
}

#[tokio::test]
async fn silent_slave_is_swept_and_available_restored() {
    let master = master_with_budget(100).await;
    let slave = slave_for(&master);
    slave.add_account(&key("camp:router"), usd(10)).await.unwrap();

    // Authorize, report the reservation upstream, then go silent forever
    slave
        .authorize_bid(&key("camp:router"), "bid-lost", &usd(5))
        .unwrap();
    slave.sync_account(&key("camp:router")).await.unwrap();

    let upstream = master.account(&key("camp:router")).unwrap();
    assert_eq!(upstream.in_flight().value(&Currency::Usd), 5 * DOLLAR);

    // Not yet: still within the staleness timeout
    master.sweep(Utc::now());
    let upstream = master.account(&key("camp:router")).unwrap();
    assert_eq!(upstream.in_flight().value(&Currency::Usd), 5 * DOLLAR);

    // Past the timeout: the dead reservation is reclaimed
    master.sweep(Utc::now() + Duration::seconds(16));
    let upstream = master.account(&key("camp:router")).unwrap();
    assert!(upstream.in_flight().is_zero());
    assert_eq!(upstream.available().value(&Currency::Usd), 10 * DOLLAR);
    assert!(master.accounts().check_invariants().is_empty());
}

#[tokio::test]
async fn crash_loses_at_most_one_interval() {
    let master = master_with_budget(100).await;

    {
        let slave = slave_for(&master);
        slave.add_account(&key("camp:router"), usd(10)).await.unwrap();

        // First interval: reported upstream
        let token = slave
            .authorize_bid(&key("camp:router"), "bid-1", &usd(2))
            .unwrap();
        slave.commit_bid(&token, &usd(2), &BTreeMap::new()).unwrap();
        slave.sync_account(&key("camp:router")).await.unwrap();

        // Second interval: never reported - the slave dies here
        slave
            .authorize_bid(&key("camp:router"), "bid-2", &usd(3))
            .unwrap();
    }

    // The unreported authorization is simply invisible upstream
    let upstream = master.account(&key("camp:router")).unwrap();
    assert_eq!(upstream.spent.value(&Currency::Usd), 2 * DOLLAR);
    assert!(upstream.in_flight().is_zero());

    // A replacement slave starts from the master's last known state
    let replacement = slave_for(&master);
    replacement
        .add_account(&key("camp:router"), usd(10))
        .await
        .unwrap();
    let shadow = replacement.shadow().account(&key("camp:router")).unwrap();
    assert_eq!(shadow.available().value(&Currency::Usd), 10 * DOLLAR);
    assert!(replacement
        .authorize_bid(&key("camp:router"), "bid-3", &usd(4))
        .is_ok());
}

#[tokio::test]
async fn float_exhaustion_is_local_and_recovers_after_sync() {
    let master = master_with_budget(100).await;
    let slave = slave_for(&master);
    slave.add_account(&key("camp:router"), usd(5)).await.unwrap();

    let token = slave
        .authorize_bid(&key("camp:router"), "bid-1", &usd(5))
        .unwrap();
    // Float exhausted: the next authorization fails locally
    assert!(slave
        .authorize_bid(&key("camp:router"), "bid-2", &usd(1))
        .is_err());

    slave.commit_bid(&token, &usd(5), &BTreeMap::new()).unwrap();
    slave.sync_account(&key("camp:router")).await.unwrap();

    // Fresh float pulled from the parent; retry succeeds
    assert!(slave
        .authorize_bid(&key("camp:router"), "bid-2", &usd(1))
        .is_ok());
}

#[tokio::test]
async fn controller_budget_operations() {
    let master = master_with_budget(100).await;
    let client = Arc::new(LocalBankerClient::new(Arc::clone(&master)));
    let controller = BudgetController::new(client);

    let account = controller
        .add_budget_sync(&key("camp"), &usd(50))
        .await
        .unwrap();
    assert_eq!(account.budget().value(&Currency::Usd), 150 * DOLLAR);

    let account = controller
        .set_budget_sync(&key("camp"), &usd(120))
        .await
        .unwrap();
    assert_eq!(account.budget().value(&Currency::Usd), 120 * DOLLAR);

    master
        .create_account(&key("camp:video"), AccountType::Budget)
        .unwrap();
    let child = controller
        .topup_transfer_sync(&key("camp"), &key("camp:video"), &usd(30))
        .await
        .unwrap();
    assert_eq!(child.available().value(&Currency::Usd), 30 * DOLLAR);
    assert!(master.accounts().check_invariants().is_empty());
}

struct FailingStorage;

#[async_trait]
impl BankerPersistence for FailingStorage {
    async fn load_all(&self, _top_level_key: &str) -> Result<Accounts, PersistenceError> {
        Ok(Accounts::new())
    }

    async fn save_all(
        &self,
        _top_level_key: &str,
        _accounts: &Accounts,
    ) -> Result<(), PersistenceError> {
        Err(PersistenceError::Backend("disk on fire".to_string()))
    }
}

#[tokio::test]
async fn health_tracks_save_status() {
    let master = MasterBanker::load(BankerConfig::default(), Arc::new(NullBankerPersistence))
        .await
        .unwrap();
    let health = master.health();
    assert!(health.healthy, "fresh master should be healthy");
    assert_eq!(health.last_save_status, "never saved");

    master.save_state().await;
    let health = master.health();
    assert!(health.healthy);
    assert_eq!(health.last_save_status, "success");
    assert!(health.last_save_at.is_some());

    let broken = MasterBanker::load(BankerConfig::default(), Arc::new(FailingStorage))
        .await
        .unwrap();
    broken.save_state().await;
    let health = broken.health();
    assert!(!health.healthy);
    assert!(health.last_save_status.starts_with("failed:"));
}

#[tokio::test]
async fn client_rejections_carry_stable_kinds() {
    let master = master_with_budget(1).await;
    let client = Arc::new(LocalBankerClient::new(Arc::clone(&master)));

    let err = client.set_budget(&key("nope"), &usd(1)).await.unwrap_err();
    assert!(!err.is_retryable());
    match &err {
        adbank_banker::ClientError::Rejected { kind, .. } => {
            assert_eq!(kind, "UnknownAccount");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}
