//! Null persistence - empty registry on load, no-op save
//!
//! Used by tests and by masters explicitly configured to run without a
//! durable store.

use crate::{BankerPersistence, PersistenceResult};
use adbank_ledger::Accounts;
use async_trait::async_trait;

#[derive(Debug, Default, Clone, Copy)]
pub struct NullBankerPersistence;

#[async_trait]
impl BankerPersistence for NullBankerPersistence {
    async fn load_all(&self, _top_level_key: &str) -> PersistenceResult<Accounts> {
        Ok(Accounts::new())
    }

    async fn save_all(&self, _top_level_key: &str, _accounts: &Accounts) -> PersistenceResult<()> {
        Ok(())
    }
}
