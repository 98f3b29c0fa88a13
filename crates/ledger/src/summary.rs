//! Account summaries - aggregated read-only views of a subtree
//!
//! Spend rolls up: a summary's `spent` is the account's own spend plus the
//! spend of every descendant, so the registry-wide totals close over the
//! whole tree.

use adbank_core::{AccountKey, CurrencyPool};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::account::Account;
use crate::registry::Accounts;

/// Aggregated view of one account and its descendants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub key: AccountKey,
    pub budget: CurrencyPool,
    pub available: CurrencyPool,
    pub in_flight: CurrencyPool,
    /// Own spend plus all descendants' spend
    pub spent: CurrencyPool,
    pub children: BTreeMap<String, AccountSummary>,
}

impl AccountSummary {
    fn build(key: &AccountKey, tree: &BTreeMap<AccountKey, Account>) -> Option<AccountSummary> {
        let account = tree.get(key)?;

        let mut children = BTreeMap::new();
        let mut spent = account.spent.clone();
        for child_key in tree.keys().filter(|k| k.parent().as_ref() == Some(key)) {
            if let Some(child) = Self::build(child_key, tree) {
                spent += &child.spent;
                let label = child_key
                    .segments()
                    .last()
                    .cloned()
                    .unwrap_or_default();
                children.insert(label, child);
            }
        }

        Some(AccountSummary {
            key: key.clone(),
            budget: account.budget(),
            available: account.available(),
            in_flight: account.in_flight(),
            spent,
            children,
        })
    }
}

/// Summarize one account and its descendants
pub fn subtree_summary(accounts: &Accounts, key: &AccountKey) -> Option<AccountSummary> {
    let tree = accounts.subtree(key);
    AccountSummary::build(key, &tree)
}

/// Registry-wide totals: one summary per top-level account
pub fn summary(accounts: &Accounts) -> BTreeMap<AccountKey, AccountSummary> {
    let tree = accounts.snapshot();
    tree.keys()
        .filter(|k| k.is_top_level())
        .filter_map(|k| AccountSummary::build(k, &tree).map(|s| (k.clone(), s)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountType;
    use adbank_core::{Amount, Currency};

    fn key(s: &str) -> AccountKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_spend_rolls_up() {
        let accounts = Accounts::new();
        accounts.create_account(&key("camp"), AccountType::Budget).unwrap();
        accounts
            .create_account(&key("camp:a"), AccountType::Spend)
            .unwrap();
        accounts
            .create_account(&key("camp:b"), AccountType::Spend)
            .unwrap();
        accounts
            .set_budget(&key("camp"), &Amount::usd(100))
            .unwrap();
        accounts
            .set_balance(&key("camp:a"), &Amount::usd(10), i64::MAX)
            .unwrap();
        accounts
            .set_balance(&key("camp:b"), &Amount::usd(20), i64::MAX)
            .unwrap();
        accounts
            .force_commit(&key("camp:a"), &Amount::usd(4), &Default::default())
            .unwrap();
        accounts
            .force_commit(&key("camp:b"), &Amount::usd(6), &Default::default())
            .unwrap();

        let top = subtree_summary(&accounts, &key("camp")).unwrap();
        assert_eq!(top.spent.value(&Currency::Usd), 10);
        assert_eq!(top.children.len(), 2);
        assert_eq!(top.children["a"].spent.value(&Currency::Usd), 4);

        let all = summary(&accounts);
        assert_eq!(all.len(), 1);
        assert_eq!(all[&key("camp")].spent.value(&Currency::Usd), 10);
    }
}
