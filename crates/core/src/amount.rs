//! Amount - single-currency money in integer micro-units
//!
//! All arithmetic is checked integer arithmetic on micro-units; there is no
//! rounding anywhere in the system. Negative amounts are legal in
//! intermediate computation (deficits) but must never survive on a
//! finalized balance column.

use crate::currency::Currency;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur when combining amounts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: Currency, right: Currency },

    #[error("Arithmetic overflow on {0} micro-units")]
    Overflow(Currency),
}

/// A monetary value: a currency code plus a signed count of micro-units.
///
/// One unit of currency is 1,000,000 micro-units. Arithmetic is defined
/// only between equal currencies; mixing currencies fails with
/// [`AmountError::CurrencyMismatch`].
///
/// # Examples
/// ```
/// use adbank_core::{Amount, Currency};
///
/// let a = Amount::usd(3_000_000); // $3
/// let b = Amount::usd(2_000_000); // $2
/// assert_eq!(a.checked_sub(&b).unwrap(), Amount::usd(1_000_000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Amount {
    /// Currency code
    pub currency: Currency,
    /// Signed micro-units (1e-6 of a currency unit)
    #[serde(rename = "microUnits")]
    pub micros: i64,
}

impl Amount {
    /// Micro-units per whole currency unit
    pub const MICROS_PER_UNIT: i64 = 1_000_000;

    /// Create an amount from raw micro-units
    pub fn new(currency: Currency, micros: i64) -> Self {
        Self { currency, micros }
    }

    /// Zero in the given currency
    pub fn zero(currency: Currency) -> Self {
        Self { currency, micros: 0 }
    }

    /// Shorthand for USD micro-units (ubiquitous in tests)
    pub fn usd(micros: i64) -> Self {
        Self::new(Currency::Usd, micros)
    }

    pub fn is_zero(&self) -> bool {
        self.micros == 0
    }

    pub fn non_negative(&self) -> bool {
        self.micros >= 0
    }

    /// Flip the sign
    pub fn negate(&self) -> Self {
        Self {
            currency: self.currency.clone(),
            micros: -self.micros,
        }
    }

    /// Checked addition; fails on currency mismatch or overflow
    pub fn checked_add(&self, other: &Amount) -> Result<Amount, AmountError> {
        self.combine(other, i64::checked_add)
    }

    /// Checked subtraction; fails on currency mismatch or overflow
    pub fn checked_sub(&self, other: &Amount) -> Result<Amount, AmountError> {
        self.combine(other, i64::checked_sub)
    }

    /// Per-currency minimum; fails on currency mismatch
    pub fn min(&self, other: &Amount) -> Result<Amount, AmountError> {
        self.check_currency(other)?;
        Ok(Amount {
            currency: self.currency.clone(),
            micros: self.micros.min(other.micros),
        })
    }

    fn combine(
        &self,
        other: &Amount,
        op: fn(i64, i64) -> Option<i64>,
    ) -> Result<Amount, AmountError> {
        self.check_currency(other)?;
        let micros = op(self.micros, other.micros)
            .ok_or_else(|| AmountError::Overflow(self.currency.clone()))?;
        Ok(Amount {
            currency: self.currency.clone(),
            micros,
        })
    }

    fn check_currency(&self, other: &Amount) -> Result<(), AmountError> {
        if self.currency != other.currency {
            return Err(AmountError::CurrencyMismatch {
                left: self.currency.clone(),
                right: other.currency.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.micros < 0 { "-" } else { "" };
        let abs = self.micros.unsigned_abs();
        write!(
            f,
            "{}{}.{:06} {}",
            sign,
            abs / Self::MICROS_PER_UNIT as u64,
            abs % Self::MICROS_PER_UNIT as u64,
            self.currency
        )
    }
}
