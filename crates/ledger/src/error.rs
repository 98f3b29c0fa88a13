//! Ledger errors

use adbank_core::{AccountKey, Amount, AmountError, KeyError};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in registry operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient funds on {key}: need {needed}, available {available}")]
    InsufficientFunds {
        key: AccountKey,
        needed: Amount,
        available: Amount,
    },

    #[error(transparent)]
    Arithmetic(#[from] AmountError),

    #[error(transparent)]
    InvalidKey(#[from] KeyError),

    #[error("Unknown account: {0}")]
    UnknownAccount(AccountKey),

    #[error("Account {key} already exists with type {existing}")]
    AlreadyExists { key: AccountKey, existing: String },

    #[error("Account {0} is closed")]
    AccountClosed(AccountKey),

    #[error("Account {0} cannot have children (Spend accounts are leaves)")]
    ParentNotBudget(AccountKey),

    #[error("Operation only valid on a top-level account: {0}")]
    NotTopLevel(AccountKey),

    #[error("Operation requires a non-top-level account: {0}")]
    RequiresParent(AccountKey),

    #[error("Account {child} is not a child of {parent}")]
    NotAChild {
        parent: AccountKey,
        child: AccountKey,
    },

    #[error("Monotone column {column} on {key} would decrease")]
    MonotonicityViolation {
        key: AccountKey,
        column: &'static str,
    },

    #[error("Unknown commitment token {0}")]
    UnknownCommitment(Uuid),

    #[error("Duplicate bid {bid_id} on {key}")]
    DuplicateBid { key: AccountKey, bid_id: String },

    #[error("Paid amount {paid} exceeds authorized {authorized} for bid {bid_id}")]
    PaidExceedsAuthorized {
        bid_id: String,
        paid: Amount,
        authorized: Amount,
    },

    #[error("Line items total {attributed} exceeds paid {paid}")]
    LineItemsExceedPaid { paid: Amount, attributed: Amount },

    #[error("Cannot close {key}: {reason}")]
    CannotClose { key: AccountKey, reason: String },
}

impl LedgerError {
    /// Stable kind tag for structured error responses
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::InsufficientFunds { .. } => "InsufficientFunds",
            LedgerError::Arithmetic(AmountError::CurrencyMismatch { .. }) => "CurrencyMismatch",
            LedgerError::Arithmetic(AmountError::Overflow(_)) => "Overflow",
            LedgerError::InvalidKey(_)
            | LedgerError::ParentNotBudget(_)
            | LedgerError::NotTopLevel(_)
            | LedgerError::RequiresParent(_)
            | LedgerError::NotAChild { .. } => "InvalidKey",
            LedgerError::UnknownAccount(_) => "UnknownAccount",
            LedgerError::AlreadyExists { .. } | LedgerError::DuplicateBid { .. } => "AlreadyExists",
            LedgerError::AccountClosed(_) => "AccountClosed",
            LedgerError::MonotonicityViolation { .. }
            | LedgerError::PaidExceedsAuthorized { .. }
            | LedgerError::LineItemsExceedPaid { .. } => "MonotonicityViolation",
            LedgerError::UnknownCommitment(_) => "UnknownCommitment",
            LedgerError::CannotClose { .. } => "CannotClose",
        }
    }
}
