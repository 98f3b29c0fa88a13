//! adbank persistence - snapshot backends for the master banker
//!
//! The master periodically snapshots the whole account tree and writes it
//! through a `BankerPersistence` capability. Backends are selected by
//! configuration, not inheritance: the null backend for tests and a
//! SQLite-backed key-value store for real deployments.
//!
//! Snapshot layout: one record per account, keyed
//! `{topLevelKey}:{account-path}`, value the JSON of the full record.
//! Snapshots are full, never incremental.

pub mod error;
pub mod null;
pub mod sqlite;

pub use error::{PersistenceError, PersistenceResult};
pub use null::NullBankerPersistence;
pub use sqlite::SqliteBankerPersistence;

use adbank_ledger::Accounts;
use async_trait::async_trait;

/// Capability object for loading and saving the full account tree.
///
/// Both operations are asynchronous and must not require any registry lock
/// to be held by the caller: `save_all` takes its own atomic snapshot and
/// serializes off-lock.
#[async_trait]
pub trait BankerPersistence: Send + Sync {
    /// Load the full registry for the given namespace. Returns an empty
    /// registry when the namespace holds no records.
    async fn load_all(&self, top_level_key: &str) -> PersistenceResult<Accounts>;

    /// Write a full snapshot of the registry under the given namespace,
    /// atomically replacing the previous snapshot.
    async fn save_all(&self, top_level_key: &str, accounts: &Accounts) -> PersistenceResult<()>;
}
