//! Migration error types.
//!
//! Per-file failures are recorded in the ledger and do not abort the batch;
//! these kinds describe what gets recorded. Ledger/database failures are the
//! exception: they abort the run, since without the ledger idempotence
//! cannot be guaranteed.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A migration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("storage backend error")]
    Storage,
    #[display("legacy source file missing: {}", _0.display())]
    SourceMissing(#[error(not(source))] PathBuf),
    /// The copy landed but reading it back produced different content.
    #[display("checksum mismatch after copy: {}", _0.display())]
    ChecksumFailed(#[error(not(source))] PathBuf),
    #[display("reference rewrite failed: {_0}")]
    ReferenceRewriteFailed(#[error(not(source))] String),
    #[display("{_0}")]
    Io(IoError),
}

impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::Io(_))
    }
}
