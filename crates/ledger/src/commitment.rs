//! Commitment tokens - pending authorizations awaiting their auction outcome

use adbank_core::{AccountKey, Amount, CurrencyPool};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Opaque handle returned by `authorize_bid` and consumed by
/// `commit_bid` / `cancel_bid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitmentToken(Uuid);

impl CommitmentToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for CommitmentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pending reservation: funds held against `available` until the auction
/// resolves. Not persisted; a crashed process's commitments are reclaimed
/// by the staleness sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commitment {
    pub key: AccountKey,
    pub bid_id: String,
    pub amount: Amount,
    pub authorized_at: DateTime<Utc>,
}

/// Record of a reservation reclaimed by the staleness sweep.
/// A warning event, not an error to any caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleCommitment {
    pub key: AccountKey,
    pub bid_id: String,
    pub amount: Amount,
    pub authorized_at: DateTime<Utc>,
}

/// A slave's accumulated local deltas for one account, shipped to the
/// master as cumulative monotone totals. Replaying the same report is a
/// no-op on the master.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpendReport {
    pub commitments_made: CurrencyPool,
    pub commitments_retired: CurrencyPool,
    pub spent: CurrencyPool,
    pub line_items: BTreeMap<String, CurrencyPool>,
}

impl SpendReport {
    /// Extract the reportable counters from an account record
    pub fn from_account(account: &crate::account::Account) -> Self {
        Self {
            commitments_made: account.commitments_made.clone(),
            commitments_retired: account.commitments_retired.clone(),
            spent: account.spent.clone(),
            line_items: account.line_items.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commitments_made.is_zero()
            && self.commitments_retired.is_zero()
            && self.spent.is_zero()
            && self.line_items.is_empty()
    }
}
