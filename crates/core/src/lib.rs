//! adbank core - value types for the budget system
//!
//! # Key Types
//! - `Currency`: type-safe currency code
//! - `Amount`: single-currency money in integer micro-units
//! - `CurrencyPool`: heterogeneous multi-currency sum (every ledger column)
//! - `AccountKey`: hierarchical colon-joined account path

pub mod amount;
pub mod currency;
pub mod key;
pub mod pool;

pub use amount::{Amount, AmountError};
pub use currency::{Currency, CurrencyError};
pub use key::{AccountKey, KeyError, KEY_SEPARATOR, MAX_DEPTH};
pub use pool::CurrencyPool;
