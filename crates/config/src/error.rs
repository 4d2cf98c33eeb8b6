//! Configuration error types.

use derive_more::{Display, Error};

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The persisted configuration cannot produce a working provider.
    #[display("storage configuration invalid: {_0}")]
    ConfigurationInvalid(#[error(not(source))] String),
    /// Reading the settings rows failed.
    #[display("settings store error")]
    Settings,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Settings)
    }
}
