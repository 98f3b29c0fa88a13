//! CurrencyPool - a heterogeneous multi-currency sum
//!
//! Every ledger column is a pool: a mapping from currency to signed
//! micro-units. Pool arithmetic is per-currency and never fails, but can
//! produce pools with negative entries; the caller decides when that is
//! acceptable. Comparison between pools is partial.

use crate::amount::Amount;
use crate::currency::Currency;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// A per-currency sum of micro-units.
///
/// Zero entries are dropped on normalization, so two pools compare equal
/// iff they hold the same non-zero values. Serialized as a list of
/// `{currency, microUnits}` pairs.
///
/// # Examples
/// ```
/// use adbank_core::{Amount, CurrencyPool};
///
/// let mut pool = CurrencyPool::new();
/// pool += Amount::usd(5_000_000);
/// pool -= Amount::usd(2_000_000);
/// assert_eq!(pool.value(&"USD".parse().unwrap()), 3_000_000);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Amount>", into = "Vec<Amount>")]
pub struct CurrencyPool {
    entries: BTreeMap<Currency, i64>,
}

impl CurrencyPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pool holding a single amount
    pub fn of(amount: Amount) -> Self {
        let mut pool = Self::new();
        pool += amount;
        pool
    }

    /// Micro-units held in the given currency (0 when absent)
    pub fn value(&self, currency: &Currency) -> i64 {
        self.entries.get(currency).copied().unwrap_or(0)
    }

    /// The held amount in the given currency
    pub fn amount(&self, currency: &Currency) -> Amount {
        Amount::new(currency.clone(), self.value(currency))
    }

    /// True when every entry is zero (i.e. the pool is empty)
    pub fn is_zero(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when no entry is negative
    pub fn non_negative(&self) -> bool {
        self.entries.values().all(|&v| v >= 0)
    }

    /// Partial order: true iff for every currency present in `other`,
    /// this pool's value is >= `other`'s.
    pub fn covers(&self, other: &CurrencyPool) -> bool {
        other
            .entries
            .iter()
            .all(|(currency, &v)| self.value(currency) >= v)
    }

    /// Per-currency minimum over the union of currencies
    pub fn min_with(&self, other: &CurrencyPool) -> CurrencyPool {
        let mut out = CurrencyPool::new();
        for currency in self.entries.keys().chain(other.entries.keys()) {
            out.set(currency.clone(), self.value(currency).min(other.value(currency)));
        }
        out
    }

    /// Per-currency maximum over the union of currencies
    pub fn max_with(&self, other: &CurrencyPool) -> CurrencyPool {
        let mut out = CurrencyPool::new();
        for currency in self.entries.keys().chain(other.entries.keys()) {
            out.set(currency.clone(), self.value(currency).max(other.value(currency)));
        }
        out
    }

    /// Clamp every entry to be at least zero
    pub fn clamp_non_negative(&self) -> CurrencyPool {
        let mut out = CurrencyPool::new();
        for (currency, &v) in &self.entries {
            out.set(currency.clone(), v.max(0));
        }
        out
    }

    /// Currencies with a non-zero entry
    pub fn currencies(&self) -> impl Iterator<Item = &Currency> {
        self.entries.keys()
    }

    /// The pool as a list of amounts
    pub fn amounts(&self) -> Vec<Amount> {
        self.entries
            .iter()
            .map(|(c, &v)| Amount::new(c.clone(), v))
            .collect()
    }

    fn set(&mut self, currency: Currency, micros: i64) {
        if micros == 0 {
            self.entries.remove(&currency);
        } else {
            self.entries.insert(currency, micros);
        }
    }
}

impl AddAssign<Amount> for CurrencyPool {
    fn add_assign(&mut self, rhs: Amount) {
        let v = self.value(&rhs.currency).saturating_add(rhs.micros);
        self.set(rhs.currency, v);
    }
}

impl SubAssign<Amount> for CurrencyPool {
    fn sub_assign(&mut self, rhs: Amount) {
        *self += rhs.negate();
    }
}

impl AddAssign<&CurrencyPool> for CurrencyPool {
    fn add_assign(&mut self, rhs: &CurrencyPool) {
        for (currency, &v) in &rhs.entries {
            let sum = self.value(currency).saturating_add(v);
            self.set(currency.clone(), sum);
        }
    }
}

impl SubAssign<&CurrencyPool> for CurrencyPool {
    fn sub_assign(&mut self, rhs: &CurrencyPool) {
        for (currency, &v) in &rhs.entries {
            let diff = self.value(currency).saturating_sub(v);
            self.set(currency.clone(), diff);
        }
    }
}

impl Add for &CurrencyPool {
    type Output = CurrencyPool;

    fn add(self, rhs: &CurrencyPool) -> CurrencyPool {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl Sub for &CurrencyPool {
    type Output = CurrencyPool;

    fn sub(self, rhs: &CurrencyPool) -> CurrencyPool {
        let mut out = self.clone();
        out -= rhs;
        out
    }
}

impl Neg for &CurrencyPool {
    type Output = CurrencyPool;

    fn neg(self) -> CurrencyPool {
        let mut out = CurrencyPool::new();
        for (currency, &v) in &self.entries {
            out.set(currency.clone(), -v);
        }
        out
    }
}

impl From<Vec<Amount>> for CurrencyPool {
    fn from(amounts: Vec<Amount>) -> Self {
        let mut pool = CurrencyPool::new();
        for amount in amounts {
            pool += amount;
        }
        pool
    }
}

impl From<CurrencyPool> for Vec<Amount> {
    fn from(pool: CurrencyPool) -> Self {
        pool.amounts()
    }
}

impl From<Amount> for CurrencyPool {
    fn from(amount: Amount) -> Self {
        CurrencyPool::of(amount)
    }
}

impl fmt::Display for CurrencyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "(empty)");
        }
        let parts: Vec<String> = self.amounts().iter().map(|a| a.to_string()).collect();
        write!(f, "{}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eur(micros: i64) -> Amount {
        Amount::new(Currency::Eur, micros)
    }

    #[test]
    fn test_add_per_currency() {
        let mut pool = CurrencyPool::new();
        pool += Amount::usd(100);
        pool += eur(200);
        pool += Amount::usd(50);

        assert_eq!(pool.value(&Currency::Usd), 150);
        assert_eq!(pool.value(&Currency::Eur), 200);
    }

    #[test]
    fn test_zero_entries_dropped() {
        let mut pool = CurrencyPool::new();
        pool += Amount::usd(100);
        pool -= Amount::usd(100);
        assert!(pool.is_zero());
        assert_eq!(pool, CurrencyPool::new());
    }

    #[test]
    fn test_negative_entries_permitted() {
        let mut pool = CurrencyPool::new();
        pool -= Amount::usd(100);
        assert!(!pool.non_negative());
        assert_eq!(pool.value(&Currency::Usd), -100);
    }

    #[test]
    fn test_covers_partial_order() {
        let a = CurrencyPool::from(vec![Amount::usd(100), eur(50)]);
        let b = CurrencyPool::of(Amount::usd(80));
        let c = CurrencyPool::of(eur(80));

        assert!(a.covers(&b));
        assert!(!a.covers(&c));
        // Incomparable: neither covers the other
        assert!(!b.covers(&c));
        assert!(!c.covers(&b));
    }

    #[test]
    fn test_covers_empty_always() {
        let a = CurrencyPool::of(Amount::usd(-5));
        assert!(a.covers(&CurrencyPool::new()));
    }

    #[test]
    fn test_min_with() {
        let a = CurrencyPool::from(vec![Amount::usd(100), eur(10)]);
        let b = CurrencyPool::of(Amount::usd(60));
        let min = a.min_with(&b);
        assert_eq!(min.value(&Currency::Usd), 60);
        // EUR absent in b, so min is 0 and the entry drops
        assert_eq!(min.value(&Currency::Eur), 0);
    }

    #[test]
    fn test_sub_and_neg() {
        let a = CurrencyPool::of(Amount::usd(100));
        let b = CurrencyPool::of(Amount::usd(30));
        assert_eq!((&a - &b).value(&Currency::Usd), 70);
        assert_eq!((-&a).value(&Currency::Usd), -100);
    }

    #[test]
    fn test_json_roundtrip() {
        let pool = CurrencyPool::from(vec![Amount::usd(1_000_000), eur(-250)]);
        let json = serde_json::to_string(&pool).unwrap();
        let back: CurrencyPool = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pool);
    }
}
