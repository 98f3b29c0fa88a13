//! Account - the ledger record
//!
//! Every column is a monotone cumulative counter (a `CurrencyPool`); the
//! interesting quantities (`budget`, `available`, `in_flight`) are derived.
//! Because `available` is defined by the conservation identity, the identity
//! holds by construction; what operations must actively preserve is
//! `available >= 0`.

use adbank_core::{Amount, CurrencyPool};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display, EnumString};

/// Account role in the tree
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// May hold children; distributes budget downward
    Budget,
    /// Leaf that records money actually leaving the system
    Spend,
    /// Transient or pure pass-through account
    #[default]
    None,
}

/// Account lifecycle state
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Closed,
}

/// The ledger entity.
///
/// Columns come in matched pairs (`*_in`/`*_out`, `*_made`/`*_retired`,
/// increases/decreases); each pair nets out to a derived quantity. Every
/// monetary unit entering an account through one column leaves through
/// another or remains in `available`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Account {
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub status: AccountStatus,

    /// Cumulative operator-granted budget from above
    pub budget_increases: CurrencyPool,
    /// Cumulative budget returned upward
    pub budget_decreases: CurrencyPool,

    /// Cumulative funds reclaimed from children
    pub recycled_in: CurrencyPool,
    /// Cumulative funds passed back to parent as unused
    pub recycled_out: CurrencyPool,

    /// Cumulative funds received from parent
    pub allocated_in: CurrencyPool,
    /// Cumulative funds handed down to children
    pub allocated_out: CurrencyPool,

    /// Cumulative reservations for pending auctions
    pub commitments_made: CurrencyPool,
    /// Cumulative reservations released (win or loss)
    pub commitments_retired: CurrencyPool,

    /// Cumulative actual spend
    pub spent: CurrencyPool,

    /// Operator manual corrections
    pub adjustments_in: CurrencyPool,
    pub adjustments_out: CurrencyPool,

    /// Sub-totals of `spent` by opaque line-item key
    pub line_items: BTreeMap<String, CurrencyPool>,
}

impl Account {
    pub fn new(account_type: AccountType) -> Self {
        Self {
            account_type,
            ..Default::default()
        }
    }

    /// `budgetIncreases - budgetDecreases`
    pub fn budget(&self) -> CurrencyPool {
        &self.budget_increases - &self.budget_decreases
    }

    /// `recycledIn - recycledOut`
    pub fn net_recycled(&self) -> CurrencyPool {
        &self.recycled_in - &self.recycled_out
    }

    /// `commitmentsMade - commitmentsRetired`
    pub fn in_flight(&self) -> CurrencyPool {
        &self.commitments_made - &self.commitments_retired
    }

    /// The conservation identity solved for the free column:
    /// `budget + netRecycled + adjustmentsIn - adjustmentsOut
    ///  - allocatedOut + allocatedIn - inFlight - spent`
    pub fn available(&self) -> CurrencyPool {
        let mut pool = self.budget();
        pool += &self.net_recycled();
        pool += &self.adjustments_in;
        pool -= &self.adjustments_out;
        pool -= &self.allocated_out;
        pool += &self.allocated_in;
        pool -= &self.in_flight();
        pool -= &self.spent;
        pool
    }

    /// Micro-units available in the currency of `amount`
    pub fn available_in(&self, amount: &Amount) -> Amount {
        self.available().amount(&amount.currency)
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Sum of all line items
    pub fn line_item_total(&self) -> CurrencyPool {
        let mut total = CurrencyPool::new();
        for pool in self.line_items.values() {
            total += pool;
        }
        total
    }

    /// Credit a line item
    pub fn add_line_item(&mut self, item: impl Into<String>, amount: Amount) {
        if amount.is_zero() {
            return;
        }
        *self.line_items.entry(item.into()).or_default() += amount;
    }

    /// Per-account self-check: non-negative available, closed accounts hold
    /// nothing in flight, line items partition spent.
    pub fn check(&self) -> bool {
        if !self.available().non_negative() {
            return false;
        }
        if self.status == AccountStatus::Closed && !self.in_flight().is_zero() {
            return false;
        }
        self.line_item_total() == self.spent
    }
}
