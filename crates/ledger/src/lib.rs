//! adbank ledger - hierarchical accounts and the transactional registry
//!
//! This is the heart of the banker. All budget and spend state changes go
//! through the `Accounts` registry.
//!
//! # Key Types
//! - `Account`: the ledger record (cumulative columns + derived `available`)
//! - `Accounts`: thread-safe transactional registry keyed by `AccountKey`
//! - `CommitmentToken`: opaque handle for a pending bid authorization
//! - `SpendReport`: a slave's cumulative counters, idempotently mergeable
//! - `AccountSummary`: aggregated subtree view

pub mod account;
pub mod commitment;
pub mod error;
pub mod registry;
pub mod summary;

pub use account::{Account, AccountStatus, AccountType};
pub use commitment::{Commitment, CommitmentToken, SpendReport, StaleCommitment};
pub use error::LedgerError;
pub use registry::{Accounts, UNATTRIBUTED_LINE_ITEM};
pub use summary::{subtree_summary, summary, AccountSummary};
