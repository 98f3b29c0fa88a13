//! Accounts registry - the transactional heart of the banker
//!
//! A thread-safe ordered tree of accounts keyed by `AccountKey`. Every
//! mutating operation either commits fully or leaves the registry
//! unchanged: the operation clones the affected record(s) under their
//! locks, validates and mutates the clones, and writes them back only on
//! success.
//!
//! Locking: each account owns its own `Mutex`; the tree structure sits
//! behind an outer `RwLock`. Multi-account operations acquire account
//! locks in path-sorted key order (a parent always sorts before its
//! descendants), which rules out lock cycles. No lock is ever held across
//! I/O - registry work is pure CPU.

use adbank_core::{AccountKey, Amount, CurrencyPool};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::warn;

use crate::account::{Account, AccountStatus, AccountType};
use crate::commitment::{Commitment, CommitmentToken, SpendReport, StaleCommitment};
use crate::error::LedgerError;

type Result<T> = std::result::Result<T, LedgerError>;

/// Reserved line-item key for spend not attributed by the caller.
/// Keeps the sum of line items equal to `spent` on every account.
pub const UNATTRIBUTED_LINE_ITEM: &str = "unattributed";

#[derive(Default)]
struct PendingCommitments {
    by_token: HashMap<CommitmentToken, Commitment>,
    by_bid: HashSet<(AccountKey, String)>,
}

impl PendingCommitments {
    fn insert(&mut self, token: CommitmentToken, commitment: Commitment) {
        self.by_bid
            .insert((commitment.key.clone(), commitment.bid_id.clone()));
        self.by_token.insert(token, commitment);
    }

    fn remove(&mut self, token: &CommitmentToken) -> Option<Commitment> {
        let commitment = self.by_token.remove(token)?;
        self.by_bid
            .remove(&(commitment.key.clone(), commitment.bid_id.clone()));
        Some(commitment)
    }
}

/// The in-memory account tree.
///
/// Cheap to share (`Arc<Accounts>`); all operations take `&self`.
/// Serializes as a plain key -> account map; pending commitments are
/// process-local and not part of the durable state.
pub struct Accounts {
    tree: RwLock<BTreeMap<AccountKey, Arc<Mutex<Account>>>>,
    pending: Mutex<PendingCommitments>,
}

impl Default for Accounts {
    fn default() -> Self {
        Self::new()
    }
}

impl Accounts {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(BTreeMap::new()),
            pending: Mutex::new(PendingCommitments::default()),
        }
    }

    // ----- structural ------------------------------------------------------

    /// Create `key` (and any missing ancestors, as `Budget`).
    ///
    /// Re-creating an account with the same type is idempotent; a `None`
    /// placeholder is upgraded in place. Any other type conflict fails
    /// with `AlreadyExists`.
    pub fn create_account(&self, key: &AccountKey, account_type: AccountType) -> Result<Account> {
        let mut tree = self.write_tree();

        for ancestor in key.ancestors() {
            match tree.get(&ancestor) {
                Some(handle) => {
                    if lock(handle).account_type == AccountType::Spend {
                        return Err(LedgerError::ParentNotBudget(ancestor));
                    }
                }
                None => {
                    tree.insert(
                        ancestor,
                        Arc::new(Mutex::new(Account::new(AccountType::Budget))),
                    );
                }
            }
        }

        if let Some(handle) = tree.get(key) {
            let mut existing = lock(handle);
            if existing.account_type == account_type {
                return Ok(existing.clone());
            }
            if existing.account_type == AccountType::None {
                existing.account_type = account_type;
                return Ok(existing.clone());
            }
            return Err(LedgerError::AlreadyExists {
                key: key.clone(),
                existing: existing.account_type.to_string(),
            });
        }

        let account = Account::new(account_type);
        tree.insert(key.clone(), Arc::new(Mutex::new(account.clone())));
        Ok(account)
    }

    /// Close an account. Rejected while reservations are in flight or any
    /// active children remain. Closed accounts stay in the tree forever.
    pub fn close_account(&self, key: &AccountKey) -> Result<Account> {
        let tree = self.read_tree();
        let handle = tree
            .get(key)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownAccount(key.clone()))?;
        let children: Vec<Arc<Mutex<Account>>> = tree
            .iter()
            .filter(|(k, _)| k.child_of(key))
            .map(|(_, h)| h.clone())
            .collect();
        drop(tree);

        // Parent sorts before its descendants, so this order is path-sorted.
        let mut account = lock(&handle);
        if !account.in_flight().is_zero() {
            return Err(LedgerError::CannotClose {
                key: key.clone(),
                reason: "commitments in flight".to_string(),
            });
        }
        for child in &children {
            if lock(child).status == AccountStatus::Active {
                return Err(LedgerError::CannotClose {
                    key: key.clone(),
                    reason: "active children remain".to_string(),
                });
            }
        }
        account.status = AccountStatus::Closed;
        Ok(account.clone())
    }

    // ----- budget flow -----------------------------------------------------

    /// Set a top-level account's budget to an absolute target.
    pub fn set_budget(&self, key: &AccountKey, amount: &Amount) -> Result<Account> {
        if amount.micros < 0 {
            return Err(LedgerError::MonotonicityViolation {
                key: key.clone(),
                column: "budget",
            });
        }
        self.with_account(key, |key, account| {
            require_top_level(key)?;
            require_active(key, account)?;
            let current = account.budget().value(&amount.currency);
            apply_budget_delta(key, account, &amount.currency, amount.micros - current)
        })
    }

    /// Add (or, when negative, return) budget on a top-level account.
    pub fn add_budget(&self, key: &AccountKey, amount: &Amount) -> Result<Account> {
        self.with_account(key, |key, account| {
            require_top_level(key)?;
            require_active(key, account)?;
            apply_budget_delta(key, account, &amount.currency, amount.micros)
        })
    }

    /// The slave's float pull: move funds between parent and child so that
    /// the child's available reaches
    /// `min(desired, parent.available + child.available)`, never moving
    /// more than `max_throttle` micro-units in one step.
    pub fn set_balance(
        &self,
        child_key: &AccountKey,
        desired: &Amount,
        max_throttle: i64,
    ) -> Result<Account> {
        let parent_key = child_key
            .parent()
            .ok_or_else(|| LedgerError::RequiresParent(child_key.clone()))?;
        let max_throttle = max_throttle.max(0);

        self.with_pair(&parent_key, child_key, |parent, child| {
            require_active(&parent_key, parent)?;
            require_active(child_key, child)?;
            let currency = &desired.currency;
            let child_avail = child.available().value(currency);
            let parent_avail = parent.available().value(currency);

            let target = desired.micros.max(0).min(parent_avail + child_avail);
            let delta = (target - child_avail).clamp(-max_throttle, max_throttle);

            if delta > 0 {
                let step = Amount::new(currency.clone(), delta);
                parent.allocated_out += step.clone();
                child.allocated_in += step;
            } else if delta < 0 {
                let step = Amount::new(currency.clone(), -delta);
                child.recycled_out += step.clone();
                parent.recycled_in += step;
            }

            // Both invariants re-checked after the child mutation.
            if !parent.available().non_negative() || !child.available().non_negative() {
                return Err(LedgerError::InsufficientFunds {
                    key: child_key.clone(),
                    needed: desired.clone(),
                    available: Amount::new(currency.clone(), parent_avail + child_avail),
                });
            }
            Ok(child.clone())
        })
    }

    /// Operator top-up: move `amount` from a parent's available into a
    /// direct child.
    pub fn transfer_budget(
        &self,
        parent_key: &AccountKey,
        child_key: &AccountKey,
        amount: &Amount,
    ) -> Result<Account> {
        if child_key.parent().as_ref() != Some(parent_key) {
            return Err(LedgerError::NotAChild {
                parent: parent_key.clone(),
                child: child_key.clone(),
            });
        }
        if amount.micros < 0 {
            return Err(LedgerError::MonotonicityViolation {
                key: parent_key.clone(),
                column: "allocatedOut",
            });
        }

        self.with_pair(parent_key, child_key, |parent, child| {
            require_active(parent_key, parent)?;
            require_active(child_key, child)?;
            let parent_avail = parent.available_in(amount);
            if parent_avail.micros < amount.micros {
                return Err(LedgerError::InsufficientFunds {
                    key: parent_key.clone(),
                    needed: amount.clone(),
                    available: parent_avail,
                });
            }
            parent.allocated_out += amount.clone();
            child.allocated_in += amount.clone();
            Ok(child.clone())
        })
    }

    /// Push unused child float back up to the parent, leaving at most
    /// `safety_float` micro-units per currency behind.
    pub fn recuperate(&self, child_key: &AccountKey, safety_float: i64) -> Result<CurrencyPool> {
        let parent_key = child_key
            .parent()
            .ok_or_else(|| LedgerError::RequiresParent(child_key.clone()))?;

        self.with_pair(&parent_key, child_key, |parent, child| {
            require_active(&parent_key, parent)?;
            let mut moved = CurrencyPool::new();
            for amount in child.available().amounts() {
                let excess = amount.micros - safety_float;
                if excess > 0 {
                    let step = Amount::new(amount.currency.clone(), excess);
                    child.recycled_out += step.clone();
                    parent.recycled_in += step.clone();
                    moved += step;
                }
            }
            Ok(moved)
        })
    }

    // ----- commitment flow -------------------------------------------------

    /// Reserve `amount` against the account's available balance.
    ///
    /// The check is made against the state at the moment of the lock; there
    /// are no reservations-of-reservations. Duplicate bid ids on the same
    /// account are rejected.
    pub fn authorize_bid(
        &self,
        key: &AccountKey,
        bid_id: &str,
        amount: &Amount,
        now: DateTime<Utc>,
    ) -> Result<CommitmentToken> {
        if amount.micros < 0 {
            return Err(LedgerError::MonotonicityViolation {
                key: key.clone(),
                column: "commitmentsMade",
            });
        }

        let handle = self.handle(key)?;
        let mut account = lock(&handle);
        require_active(key, &account)?;

        let available = account.available_in(amount);
        if available.micros < amount.micros {
            return Err(LedgerError::InsufficientFunds {
                key: key.clone(),
                needed: amount.clone(),
                available,
            });
        }

        let mut pending = self.lock_pending();
        if pending
            .by_bid
            .contains(&(key.clone(), bid_id.to_string()))
        {
            return Err(LedgerError::DuplicateBid {
                key: key.clone(),
                bid_id: bid_id.to_string(),
            });
        }

        account.commitments_made += amount.clone();
        let token = CommitmentToken::generate();
        pending.insert(
            token,
            Commitment {
                key: key.clone(),
                bid_id: bid_id.to_string(),
                amount: amount.clone(),
                authorized_at: now,
            },
        );
        Ok(token)
    }

    /// Settle an authorization: retire the full authorized amount and
    /// record `paid` as spent, attributed to the given line items.
    /// `paid = 0` is the loss path.
    pub fn commit_bid(
        &self,
        token: &CommitmentToken,
        paid: &Amount,
        line_items: &BTreeMap<String, Amount>,
    ) -> Result<Account> {
        let commitment = self
            .lock_pending()
            .remove(token)
            .ok_or(LedgerError::UnknownCommitment(token.as_uuid()))?;

        match self.retire(&commitment, paid, line_items) {
            Ok(account) => Ok(account),
            Err(err) => {
                // Leave the registry unchanged: the token stays claimable.
                self.lock_pending().insert(*token, commitment);
                Err(err)
            }
        }
    }

    /// Release an authorization without spending (`paid = 0`).
    pub fn cancel_bid(&self, token: &CommitmentToken) -> Result<Account> {
        let commitment = self
            .lock_pending()
            .remove(token)
            .ok_or(LedgerError::UnknownCommitment(token.as_uuid()))?;

        let zero = Amount::zero(commitment.amount.currency.clone());
        match self.retire(&commitment, &zero, &BTreeMap::new()) {
            Ok(account) => Ok(account),
            Err(err) => {
                self.lock_pending().insert(*token, commitment);
                Err(err)
            }
        }
    }

    /// Record spend with no matching local authorization (the post-auction
    /// force path: a win whose reservation already expired). Retires
    /// nothing.
    pub fn force_commit(
        &self,
        key: &AccountKey,
        paid: &Amount,
        line_items: &BTreeMap<String, Amount>,
    ) -> Result<Account> {
        if paid.micros < 0 {
            return Err(LedgerError::MonotonicityViolation {
                key: key.clone(),
                column: "spent",
            });
        }
        self.with_account(key, |key, account| {
            let available = account.available_in(paid);
            if available.micros < paid.micros {
                return Err(LedgerError::InsufficientFunds {
                    key: key.clone(),
                    needed: paid.clone(),
                    available,
                });
            }
            credit_spend(account, paid, line_items)?;
            Ok(account.clone())
        })
    }

    fn retire(
        &self,
        commitment: &Commitment,
        paid: &Amount,
        line_items: &BTreeMap<String, Amount>,
    ) -> Result<Account> {
        if paid.currency != commitment.amount.currency {
            return Err(adbank_core::AmountError::CurrencyMismatch {
                left: paid.currency.clone(),
                right: commitment.amount.currency.clone(),
            }
            .into());
        }
        if paid.micros < 0 {
            return Err(LedgerError::MonotonicityViolation {
                key: commitment.key.clone(),
                column: "spent",
            });
        }
        if paid.micros > commitment.amount.micros {
            return Err(LedgerError::PaidExceedsAuthorized {
                bid_id: commitment.bid_id.clone(),
                paid: paid.clone(),
                authorized: commitment.amount.clone(),
            });
        }

        self.with_account(&commitment.key, |_, account| {
            account.commitments_retired += commitment.amount.clone();
            credit_spend(account, paid, line_items)?;
            Ok(account.clone())
        })
    }

    // ----- replication -----------------------------------------------------

    /// Apply a slave's cumulative counters. Monotone totals merge with a
    /// per-currency `max`, so replaying a report is a no-op and a report
    /// arriving after a master-side sweep never decreases anything.
    pub fn apply_spend_report(&self, key: &AccountKey, report: &SpendReport) -> Result<Account> {
        self.with_account(key, |key, account| {
            require_active(key, account)?;
            account.commitments_made = account.commitments_made.max_with(&report.commitments_made);
            account.commitments_retired = account
                .commitments_retired
                .max_with(&report.commitments_retired);
            account.spent = account.spent.max_with(&report.spent);
            for (item, pool) in &report.line_items {
                let merged = account
                    .line_items
                    .get(item)
                    .map(|current| current.max_with(pool))
                    .unwrap_or_else(|| pool.clone());
                account.line_items.insert(item.clone(), merged);
            }

            let available = account.available();
            if !available.non_negative() {
                let deficit = available
                    .amounts()
                    .into_iter()
                    .find(|a| a.micros < 0)
                    .map(|a| a.negate())
                    .unwrap_or_else(|| Amount::usd(0));
                return Err(LedgerError::InsufficientFunds {
                    key: key.clone(),
                    needed: deficit.clone(),
                    available: deficit.negate(),
                });
            }
            Ok(account.clone())
        })
    }

    // ----- reads -----------------------------------------------------------

    /// A copy of one account
    pub fn account(&self, key: &AccountKey) -> Option<Account> {
        let tree = self.read_tree();
        tree.get(key).map(|handle| lock(handle).clone())
    }

    pub fn contains(&self, key: &AccountKey) -> bool {
        self.read_tree().contains_key(key)
    }

    pub fn keys(&self) -> Vec<AccountKey> {
        self.read_tree().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read_tree().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_tree().is_empty()
    }

    /// Atomic copy of the whole tree (the persistence snapshot).
    /// Accounts are locked one at a time in path order.
    pub fn snapshot(&self) -> BTreeMap<AccountKey, Account> {
        let tree = self.read_tree();
        tree.iter()
            .map(|(key, handle)| (key.clone(), lock(handle).clone()))
            .collect()
    }

    /// The account plus all its descendants
    pub fn subtree(&self, key: &AccountKey) -> BTreeMap<AccountKey, Account> {
        let tree = self.read_tree();
        tree.iter()
            .filter(|(k, _)| *k == key || k.child_of(key))
            .map(|(k, handle)| (k.clone(), lock(handle).clone()))
            .collect()
    }

    /// Registry self-check; returns the keys violating any invariant.
    pub fn check_invariants(&self) -> Vec<AccountKey> {
        let snapshot = self.snapshot();
        let mut offending = Vec::new();
        for (key, account) in &snapshot {
            let parent_ok = match key.parent() {
                Some(parent) => snapshot.contains_key(&parent),
                None => true,
            };
            if !account.check() || !parent_ok {
                offending.push(key.clone());
            }
        }
        offending
    }

    // ----- staleness -------------------------------------------------------

    /// Auto-retire pending commitments older than `ttl` with `paid = 0`.
    pub fn sweep_stale(&self, ttl: Duration, now: DateTime<Utc>) -> Vec<StaleCommitment> {
        let stale: Vec<(CommitmentToken, Commitment)> = {
            let mut pending = self.lock_pending();
            let tokens: Vec<CommitmentToken> = pending
                .by_token
                .iter()
                .filter(|(_, c)| c.authorized_at + ttl <= now)
                .map(|(t, _)| *t)
                .collect();
            tokens
                .into_iter()
                .filter_map(|t| pending.remove(&t).map(|c| (t, c)))
                .collect()
        };

        let mut swept = Vec::new();
        for (_, commitment) in stale {
            let zero = Amount::zero(commitment.amount.currency.clone());
            match self.retire(&commitment, &zero, &BTreeMap::new()) {
                Ok(_) => {
                    warn!(
                        key = %commitment.key,
                        bid_id = %commitment.bid_id,
                        amount = %commitment.amount,
                        "stale commitment reclaimed"
                    );
                    swept.push(StaleCommitment {
                        key: commitment.key,
                        bid_id: commitment.bid_id,
                        amount: commitment.amount,
                        authorized_at: commitment.authorized_at,
                    });
                }
                Err(err) => {
                    warn!(
                        key = %commitment.key,
                        bid_id = %commitment.bid_id,
                        error = %err,
                        "failed to reclaim stale commitment"
                    );
                }
            }
        }
        swept
    }

    /// Retire everything an account still holds in flight (used when the
    /// owning slave has gone silent past the staleness timeout). Also
    /// drops any pending tokens for the account.
    pub fn reclaim_in_flight(&self, key: &AccountKey) -> Result<CurrencyPool> {
        let reclaimed = self.with_account(key, |_, account| {
            let in_flight = account.in_flight().clamp_non_negative();
            account.commitments_retired += &in_flight;
            Ok(in_flight)
        })?;

        let mut pending = self.lock_pending();
        let dead: Vec<CommitmentToken> = pending
            .by_token
            .iter()
            .filter(|(_, c)| &c.key == key)
            .map(|(t, _)| *t)
            .collect();
        for token in dead {
            pending.remove(&token);
        }
        Ok(reclaimed)
    }

    /// Number of reservations currently pending
    pub fn pending_commitments(&self) -> usize {
        self.lock_pending().by_token.len()
    }

    /// Rehydration: replace (or insert) an account record wholesale.
    ///
    /// This is the one path that may touch a `Closed` account.
    pub fn restore(&self, key: &AccountKey, account: Account) {
        let mut tree = self.write_tree();
        match tree.get(key) {
            Some(handle) => *lock(handle) = account,
            None => {
                tree.insert(key.clone(), Arc::new(Mutex::new(account)));
            }
        }
    }

    /// Merge a refreshed master record into this (shadow) registry.
    ///
    /// Budget and allocation columns are the master's word; the local
    /// monotone counters win where they have advanced past the master's
    /// copy (authorizations made while the sync round-trip was in flight).
    pub fn adopt_master_record(&self, key: &AccountKey, master: &Account) {
        {
            let mut tree = self.write_tree();
            if !tree.contains_key(key) {
                tree.insert(key.clone(), Arc::new(Mutex::new(master.clone())));
                return;
            }
        }
        // Ignore the result: the closure is infallible.
        let _ = self.with_account(key, |_, local| {
            let mut merged = master.clone();
            merged.commitments_made = master.commitments_made.max_with(&local.commitments_made);
            merged.commitments_retired =
                master.commitments_retired.max_with(&local.commitments_retired);
            merged.spent = master.spent.max_with(&local.spent);
            merged.line_items = local.line_items.clone();
            for (item, pool) in &master.line_items {
                let entry = merged.line_items.entry(item.clone()).or_default();
                *entry = entry.max_with(pool);
            }
            *local = merged;
            Ok(())
        });
    }

    // ----- internals -------------------------------------------------------

    fn read_tree(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, BTreeMap<AccountKey, Arc<Mutex<Account>>>> {
        self.tree.read().expect("account tree lock poisoned")
    }

    fn write_tree(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, BTreeMap<AccountKey, Arc<Mutex<Account>>>> {
        self.tree.write().expect("account tree lock poisoned")
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingCommitments> {
        self.pending.lock().expect("pending table lock poisoned")
    }

    fn handle(&self, key: &AccountKey) -> Result<Arc<Mutex<Account>>> {
        self.read_tree()
            .get(key)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownAccount(key.clone()))
    }

    /// Clone-validate-commit on a single account.
    fn with_account<R>(
        &self,
        key: &AccountKey,
        op: impl FnOnce(&AccountKey, &mut Account) -> Result<R>,
    ) -> Result<R> {
        let handle = self.handle(key)?;
        let mut guard = lock(&handle);
        let mut draft = guard.clone();
        let result = op(key, &mut draft)?;
        *guard = draft;
        Ok(result)
    }

    /// Clone-validate-commit on two accounts, locks acquired in key order
    /// (path-sorted: a parent key always precedes its descendants).
    fn with_pair<R>(
        &self,
        first: &AccountKey,
        second: &AccountKey,
        op: impl FnOnce(&mut Account, &mut Account) -> Result<R>,
    ) -> Result<R> {
        let first_handle = self.handle(first)?;
        let second_handle = self.handle(second)?;

        let (mut first_guard, mut second_guard) = if first <= second {
            let a = lock(&first_handle);
            let b = lock(&second_handle);
            (a, b)
        } else {
            let b = lock(&second_handle);
            let a = lock(&first_handle);
            (a, b)
        };

        let mut first_draft = first_guard.clone();
        let mut second_draft = second_guard.clone();
        let result = op(&mut first_draft, &mut second_draft)?;
        *first_guard = first_draft;
        *second_guard = second_draft;
        Ok(result)
    }
}

impl From<BTreeMap<AccountKey, Account>> for Accounts {
    fn from(map: BTreeMap<AccountKey, Account>) -> Self {
        let tree = map
            .into_iter()
            .map(|(key, account)| (key, Arc::new(Mutex::new(account))))
            .collect();
        Self {
            tree: RwLock::new(tree),
            pending: Mutex::new(PendingCommitments::default()),
        }
    }
}

/// Registries compare equal iff all accounts compare equal.
impl PartialEq for Accounts {
    fn eq(&self, other: &Self) -> bool {
        self.snapshot() == other.snapshot()
    }
}

impl std::fmt::Debug for Accounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accounts")
            .field("accounts", &self.len())
            .field("pending", &self.pending_commitments())
            .finish()
    }
}

impl serde::Serialize for Accounts {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Accounts {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let map = BTreeMap::<AccountKey, Account>::deserialize(deserializer)?;
        Ok(Accounts::from(map))
    }
}

fn lock(handle: &Mutex<Account>) -> MutexGuard<'_, Account> {
    handle.lock().expect("account lock poisoned")
}

fn require_top_level(key: &AccountKey) -> Result<()> {
    if !key.is_top_level() {
        return Err(LedgerError::NotTopLevel(key.clone()));
    }
    Ok(())
}

fn require_active(key: &AccountKey, account: &Account) -> Result<()> {
    if !account.is_active() {
        return Err(LedgerError::AccountClosed(key.clone()));
    }
    Ok(())
}

fn apply_budget_delta(
    key: &AccountKey,
    account: &mut Account,
    currency: &adbank_core::Currency,
    delta: i64,
) -> Result<Account> {
    if delta > 0 {
        account.budget_increases += Amount::new(currency.clone(), delta);
    } else if delta < 0 {
        let give_back = Amount::new(currency.clone(), -delta);
        let available = account.available().amount(currency);
        if available.micros < give_back.micros {
            return Err(LedgerError::InsufficientFunds {
                key: key.clone(),
                needed: give_back,
                available,
            });
        }
        account.budget_decreases += give_back;
    }
    Ok(account.clone())
}

fn credit_spend(
    account: &mut Account,
    paid: &Amount,
    line_items: &BTreeMap<String, Amount>,
) -> Result<()> {
    let mut attributed = 0i64;
    for (item, amount) in line_items {
        if amount.currency != paid.currency {
            return Err(adbank_core::AmountError::CurrencyMismatch {
                left: amount.currency.clone(),
                right: paid.currency.clone(),
            }
            .into());
        }
        attributed += amount.micros;
        account.add_line_item(item.clone(), amount.clone());
    }
    if attributed > paid.micros {
        return Err(LedgerError::LineItemsExceedPaid {
            paid: paid.clone(),
            attributed: Amount::new(paid.currency.clone(), attributed),
        });
    }
    if attributed < paid.micros {
        account.add_line_item(
            UNATTRIBUTED_LINE_ITEM,
            Amount::new(paid.currency.clone(), paid.micros - attributed),
        );
    }
    account.spent += paid.clone();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use adbank_core::Currency;

    fn key(s: &str) -> AccountKey {
        s.parse().unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn funded_leaf(accounts: &Accounts, top: &str, leaf: &str, micros: i64) {
        accounts
            .create_account(&key(top), AccountType::Budget)
            .unwrap();
        accounts
            .create_account(&key(leaf), AccountType::Spend)
            .unwrap();
        accounts
            .set_budget(&key(top), &Amount::usd(micros))
            .unwrap();
        accounts
            .set_balance(&key(leaf), &Amount::usd(micros), i64::MAX)
            .unwrap();
    }

    #[test]
    fn test_create_builds_missing_ancestors() {
        let accounts = Accounts::new();
        accounts
            .create_account(&key("a:b:c"), AccountType::Spend)
            .unwrap();

        assert!(accounts.contains(&key("a")));
        assert!(accounts.contains(&key("a:b")));
        assert_eq!(
            accounts.account(&key("a")).unwrap().account_type,
            AccountType::Budget
        );
        assert!(accounts.check_invariants().is_empty());
    }

    #[test]
    fn test_create_idempotent_but_type_conflict_rejected() {
        let accounts = Accounts::new();
        accounts
            .create_account(&key("a"), AccountType::Budget)
            .unwrap();
        accounts
            .create_account(&key("a"), AccountType::Budget)
            .unwrap();
        assert!(matches!(
            accounts.create_account(&key("a"), AccountType::Spend),
            Err(LedgerError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_create_under_spend_parent_rejected() {
        let accounts = Accounts::new();
        accounts
            .create_account(&key("a"), AccountType::Spend)
            .unwrap();
        assert!(matches!(
            accounts.create_account(&key("a:b"), AccountType::Spend),
            Err(LedgerError::ParentNotBudget(_))
        ));
    }

    #[test]
    fn test_set_budget_and_reduce() {
        let accounts = Accounts::new();
        accounts
            .create_account(&key("camp"), AccountType::Budget)
            .unwrap();

        let account = accounts
            .set_budget(&key("camp"), &Amount::usd(100))
            .unwrap();
        assert_eq!(account.available().value(&Currency::Usd), 100);

        // Reduce to 40: fine, all of it is still available
        let account = accounts.set_budget(&key("camp"), &Amount::usd(40)).unwrap();
        assert_eq!(account.budget().value(&Currency::Usd), 40);
        assert_eq!(account.available().value(&Currency::Usd), 40);
    }

    #[test]
    fn test_set_budget_reduction_blocked_by_allocation() {
        let accounts = Accounts::new();
        funded_leaf(&accounts, "camp", "camp:leaf", 100);

        // Everything is allocated down; cannot shrink the budget
        let err = accounts.set_budget(&key("camp"), &Amount::usd(10));
        assert!(matches!(err, Err(LedgerError::InsufficientFunds { .. })));
        // Unchanged on failure
        assert_eq!(
            accounts
                .account(&key("camp"))
                .unwrap()
                .budget()
                .value(&Currency::Usd),
            100
        );
    }

    #[test]
    fn test_set_budget_only_top_level() {
        let accounts = Accounts::new();
        accounts
            .create_account(&key("a:b"), AccountType::Budget)
            .unwrap();
        assert!(matches!(
            accounts.set_budget(&key("a:b"), &Amount::usd(10)),
            Err(LedgerError::NotTopLevel(_))
        ));
    }

    #[test]
    fn test_set_balance_pull_and_withdraw() {
        let accounts = Accounts::new();
        funded_leaf(&accounts, "camp", "camp:leaf", 100);
        // funded_leaf pulled the full 100 into the leaf
        let leaf = accounts.account(&key("camp:leaf")).unwrap();
        assert_eq!(leaf.available().value(&Currency::Usd), 100);

        // Withdraw back to 30
        let leaf = accounts
            .set_balance(&key("camp:leaf"), &Amount::usd(30), i64::MAX)
            .unwrap();
        assert_eq!(leaf.available().value(&Currency::Usd), 30);
        let parent = accounts.account(&key("camp")).unwrap();
        assert_eq!(parent.available().value(&Currency::Usd), 70);
        assert_eq!(parent.recycled_in.value(&Currency::Usd), 70);
        assert!(accounts.check_invariants().is_empty());
    }

    #[test]
    fn test_set_balance_clamped_by_parent_available() {
        let accounts = Accounts::new();
        funded_leaf(&accounts, "camp", "camp:leaf", 100);
        accounts
            .create_account(&key("camp:other"), AccountType::Spend)
            .unwrap();

        // Parent has nothing left; desired 50 yields only the leaf's own 0
        let other = accounts
            .set_balance(&key("camp:other"), &Amount::usd(50), i64::MAX)
            .unwrap();
        assert_eq!(other.available().value(&Currency::Usd), 0);
    }

    #[test]
    fn test_set_balance_throttled() {
        let accounts = Accounts::new();
        accounts
            .create_account(&key("camp"), AccountType::Budget)
            .unwrap();
        accounts
            .create_account(&key("camp:leaf"), AccountType::Spend)
            .unwrap();
        accounts
            .set_budget(&key("camp"), &Amount::usd(100))
            .unwrap();

        let leaf = accounts
            .set_balance(&key("camp:leaf"), &Amount::usd(80), 25)
            .unwrap();
        assert_eq!(leaf.available().value(&Currency::Usd), 25);
    }

    #[test]
    fn test_authorize_commit_lifecycle() {
        let accounts = Accounts::new();
        funded_leaf(&accounts, "camp", "camp:leaf", 10);

        let token = accounts
            .authorize_bid(&key("camp:leaf"), "bid-1", &Amount::usd(3), now())
            .unwrap();
        let leaf = accounts.account(&key("camp:leaf")).unwrap();
        assert_eq!(leaf.available().value(&Currency::Usd), 7);
        assert_eq!(leaf.in_flight().value(&Currency::Usd), 3);

        let mut items = BTreeMap::new();
        items.insert("li-1".to_string(), Amount::usd(2));
        let leaf = accounts.commit_bid(&token, &Amount::usd(2), &items).unwrap();

        assert_eq!(leaf.spent.value(&Currency::Usd), 2);
        assert!(leaf.in_flight().is_zero());
        assert_eq!(leaf.available().value(&Currency::Usd), 8);
        assert_eq!(leaf.line_items["li-1"].value(&Currency::Usd), 2);
        assert_eq!(accounts.pending_commitments(), 0);
        assert!(accounts.check_invariants().is_empty());
    }

    #[test]
    fn test_over_authorization_rejected_state_unchanged() {
        let accounts = Accounts::new();
        funded_leaf(&accounts, "camp", "camp:leaf", 1);

        let before = accounts.account(&key("camp:leaf")).unwrap();
        let err = accounts.authorize_bid(&key("camp:leaf"), "bid-1", &Amount::usd(2), now());
        assert!(matches!(err, Err(LedgerError::InsufficientFunds { .. })));
        assert_eq!(accounts.account(&key("camp:leaf")).unwrap(), before);
        assert_eq!(accounts.pending_commitments(), 0);
    }

    #[test]
    fn test_duplicate_bid_rejected() {
        let accounts = Accounts::new();
        funded_leaf(&accounts, "camp", "camp:leaf", 10);

        accounts
            .authorize_bid(&key("camp:leaf"), "bid-1", &Amount::usd(1), now())
            .unwrap();
        assert!(matches!(
            accounts.authorize_bid(&key("camp:leaf"), "bid-1", &Amount::usd(1), now()),
            Err(LedgerError::DuplicateBid { .. })
        ));
    }

    #[test]
    fn test_cancel_restores_available() {
        let accounts = Accounts::new();
        funded_leaf(&accounts, "camp", "camp:leaf", 10);

        let token = accounts
            .authorize_bid(&key("camp:leaf"), "bid-1", &Amount::usd(4), now())
            .unwrap();
        accounts.cancel_bid(&token).unwrap();

        let leaf = accounts.account(&key("camp:leaf")).unwrap();
        assert_eq!(leaf.available().value(&Currency::Usd), 10);
        assert!(leaf.spent.is_zero());
        assert!(matches!(
            accounts.cancel_bid(&token),
            Err(LedgerError::UnknownCommitment(_))
        ));
    }

    #[test]
    fn test_paid_above_authorized_rejected_and_token_survives() {
        let accounts = Accounts::new();
        funded_leaf(&accounts, "camp", "camp:leaf", 10);

        let token = accounts
            .authorize_bid(&key("camp:leaf"), "bid-1", &Amount::usd(3), now())
            .unwrap();
        assert!(matches!(
            accounts.commit_bid(&token, &Amount::usd(5), &BTreeMap::new()),
            Err(LedgerError::PaidExceedsAuthorized { .. })
        ));
        // The failed commit left the reservation claimable
        accounts.commit_bid(&token, &Amount::usd(3), &BTreeMap::new()).unwrap();
    }

    #[test]
    fn test_unattributed_line_item_remainder() {
        let accounts = Accounts::new();
        funded_leaf(&accounts, "camp", "camp:leaf", 10);

        let token = accounts
            .authorize_bid(&key("camp:leaf"), "bid-1", &Amount::usd(5), now())
            .unwrap();
        let mut items = BTreeMap::new();
        items.insert("li-1".to_string(), Amount::usd(2));
        let leaf = accounts.commit_bid(&token, &Amount::usd(5), &items).unwrap();

        assert_eq!(leaf.line_items[UNATTRIBUTED_LINE_ITEM].value(&Currency::Usd), 3);
        assert_eq!(leaf.line_item_total(), leaf.spent);
    }

    #[test]
    fn test_recuperate_leaves_safety_float() {
        let accounts = Accounts::new();
        funded_leaf(&accounts, "camp", "camp:leaf", 10_000_000);

        let moved = accounts.recuperate(&key("camp:leaf"), 4_000_000).unwrap();
        assert_eq!(moved.value(&Currency::Usd), 6_000_000);

        let leaf = accounts.account(&key("camp:leaf")).unwrap();
        assert_eq!(leaf.available().value(&Currency::Usd), 4_000_000);
        let parent = accounts.account(&key("camp")).unwrap();
        assert_eq!(parent.recycled_in.value(&Currency::Usd), 6_000_000);
    }

    #[test]
    fn test_close_account_rules() {
        let accounts = Accounts::new();
        funded_leaf(&accounts, "camp", "camp:leaf", 10);

        let token = accounts
            .authorize_bid(&key("camp:leaf"), "bid-1", &Amount::usd(2), now())
            .unwrap();
        assert!(matches!(
            accounts.close_account(&key("camp:leaf")),
            Err(LedgerError::CannotClose { .. })
        ));
        assert!(matches!(
            accounts.close_account(&key("camp")),
            Err(LedgerError::CannotClose { .. })
        ));

        accounts.cancel_bid(&token).unwrap();
        accounts.close_account(&key("camp:leaf")).unwrap();
        accounts.close_account(&key("camp")).unwrap();

        assert!(matches!(
            accounts.authorize_bid(&key("camp:leaf"), "bid-2", &Amount::usd(1), now()),
            Err(LedgerError::AccountClosed(_))
        ));
    }

    #[test]
    fn test_apply_spend_report_idempotent() {
        let accounts = Accounts::new();
        funded_leaf(&accounts, "camp", "camp:leaf", 10);

        let mut report = SpendReport::default();
        report.commitments_made += Amount::usd(5);
        report.commitments_retired += Amount::usd(5);
        report.spent += Amount::usd(4);
        report
            .line_items
            .insert("li-1".to_string(), CurrencyPool::of(Amount::usd(4)));

        let first = accounts
            .apply_spend_report(&key("camp:leaf"), &report)
            .unwrap();
        assert_eq!(first.spent.value(&Currency::Usd), 4);
        assert_eq!(first.available().value(&Currency::Usd), 6);

        // Replaying the identical totals changes nothing
        let second = accounts
            .apply_spend_report(&key("camp:leaf"), &report)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_apply_spend_report_after_sweep_does_not_decrease() {
        let accounts = Accounts::new();
        funded_leaf(&accounts, "camp", "camp:leaf", 10);

        // Slave authorized 5 and told us; then went silent and we reclaimed
        let mut report = SpendReport::default();
        report.commitments_made += Amount::usd(5);
        accounts
            .apply_spend_report(&key("camp:leaf"), &report)
            .unwrap();
        accounts.reclaim_in_flight(&key("camp:leaf")).unwrap();
        let account = accounts.account(&key("camp:leaf")).unwrap();
        assert_eq!(account.available().value(&Currency::Usd), 10);

        // The slave comes back and replays its (old) totals: no decrease
        let account = accounts
            .apply_spend_report(&key("camp:leaf"), &report)
            .unwrap();
        assert_eq!(account.commitments_retired.value(&Currency::Usd), 5);
        assert_eq!(account.available().value(&Currency::Usd), 10);
    }

    #[test]
    fn test_sweep_stale_reclaims_and_warns() {
        let accounts = Accounts::new();
        funded_leaf(&accounts, "camp", "camp:leaf", 10);

        let t0 = now();
        accounts
            .authorize_bid(&key("camp:leaf"), "bid-old", &Amount::usd(5), t0)
            .unwrap();
        accounts
            .authorize_bid(
                &key("camp:leaf"),
                "bid-new",
                &Amount::usd(1),
                t0 + Duration::seconds(20),
            )
            .unwrap();

        let swept = accounts.sweep_stale(Duration::seconds(15), t0 + Duration::seconds(20));
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].bid_id, "bid-old");
        assert_eq!(swept[0].amount, Amount::usd(5));

        let leaf = accounts.account(&key("camp:leaf")).unwrap();
        assert_eq!(leaf.in_flight().value(&Currency::Usd), 1);
        assert_eq!(leaf.available().value(&Currency::Usd), 4);
        assert_eq!(accounts.pending_commitments(), 1);
    }

    #[test]
    fn test_negative_amounts_are_monotonicity_violations() {
        let accounts = Accounts::new();
        funded_leaf(&accounts, "camp", "camp:leaf", 10);

        assert!(matches!(
            accounts.authorize_bid(&key("camp:leaf"), "b", &Amount::usd(-1), now()),
            Err(LedgerError::MonotonicityViolation { .. })
        ));
        assert!(matches!(
            accounts.force_commit(&key("camp:leaf"), &Amount::usd(-1), &BTreeMap::new()),
            Err(LedgerError::MonotonicityViolation { .. })
        ));
    }

    #[test]
    fn test_transfer_budget() {
        let accounts = Accounts::new();
        accounts
            .create_account(&key("camp"), AccountType::Budget)
            .unwrap();
        accounts
            .create_account(&key("camp:leaf"), AccountType::Spend)
            .unwrap();
        accounts
            .set_budget(&key("camp"), &Amount::usd(50))
            .unwrap();

        let leaf = accounts
            .transfer_budget(&key("camp"), &key("camp:leaf"), &Amount::usd(20))
            .unwrap();
        assert_eq!(leaf.available().value(&Currency::Usd), 20);

        assert!(matches!(
            accounts.transfer_budget(&key("camp"), &key("camp:leaf"), &Amount::usd(40)),
            Err(LedgerError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_serde_roundtrip_preserves_all_columns() {
        let accounts = Accounts::new();
        funded_leaf(&accounts, "camp", "camp:leaf", 10);
        let token = accounts
            .authorize_bid(&key("camp:leaf"), "bid-1", &Amount::usd(3), now())
            .unwrap();
        accounts.commit_bid(&token, &Amount::usd(2), &BTreeMap::new()).unwrap();

        let json = serde_json::to_string(&accounts).unwrap();
        let restored: Accounts = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, accounts);
    }

    #[test]
    fn test_concurrent_multi_account_operations_terminate() {
        use std::sync::Arc as StdArc;

        let accounts = StdArc::new(Accounts::new());
        accounts
            .create_account(&key("camp"), AccountType::Budget)
            .unwrap();
        for i in 0..4 {
            accounts
                .create_account(&key(&format!("camp:leaf{i}")), AccountType::Spend)
                .unwrap();
        }
        accounts
            .set_budget(&key("camp"), &Amount::usd(1_000_000))
            .unwrap();

        let mut threads = Vec::new();
        for t in 0..8 {
            let accounts = accounts.clone();
            threads.push(std::thread::spawn(move || {
                let leaf = key(&format!("camp:leaf{}", t % 4));
                for round in 0..50 {
                    let _ = accounts.set_balance(&leaf, &Amount::usd(100), i64::MAX);
                    if let Ok(token) =
                        accounts.authorize_bid(&leaf, &format!("b-{t}-{round}"), &Amount::usd(7), Utc::now())
                    {
                        let _ = accounts.commit_bid(&token, &Amount::usd(3), &BTreeMap::new());
                    }
                    let _ = accounts.recuperate(&leaf, 10);
                }
            }));
        }
        for thread in threads {
            thread.join().unwrap();
        }

        assert!(accounts.check_invariants().is_empty());
    }
}

