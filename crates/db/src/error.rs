//! Persistence error types.
//!
//! Structured errors using `exn` for automatic location tracking. Callers
//! match on [`ErrorKind`] to decide what to do; the underlying sqlx error is
//! attached to the exception tree, not exposed in the variant.

use derive_more::{Display, Error};

/// A persistence error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    #[display("setting not found: {_0}")]
    SettingNotFound(#[error(not(source))] String),
    #[display("ledger record not found: {_0}")]
    RecordNotFound(#[error(not(source))] String),
    /// A stored value failed to convert into its in-memory shape.
    #[display("invalid stored data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // SQLITE_BUSY is already absorbed by the busy timeout; nothing left
        // here is transient.
        false
    }
}
