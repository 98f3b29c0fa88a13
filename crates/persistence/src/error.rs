//! Persistence errors
//!
//! The two failure kinds mirror the callback statuses of the persistence
//! contract: transient backend trouble (retryable, feeds the health
//! indicator) and a load-time invariant failure (fatal at startup).

use thiserror::Error;

/// Errors from a persistence backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Transient I/O failure against the backend; info is human-readable
    #[error("backend error: {0}")]
    Backend(String),

    /// Loaded data violates a registry invariant; info is the list of
    /// offending record keys. Fatal at startup.
    #[error("data inconsistency on: {}", .0.join(", "))]
    DataInconsistency(Vec<String>),
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        PersistenceError::Backend(err.to_string())
    }
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;
