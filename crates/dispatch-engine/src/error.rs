//! Dispatch error types.

use relay_core::CoreError;
use thiserror::Error;

/// Errors that end a dispatch run.
///
/// Transport failures are not errors here: they only reschedule the message.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Store read or write failed
    #[error("Database error: {0}")]
    Database(#[from] relay_database::DatabaseError),

    /// Dispatch configuration rejected
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<CoreError> for DispatchError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config(msg) => Self::Config(msg),
            other => Self::Config(other.to_string()),
        }
    }
}

/// Result type alias using DispatchError.
pub type DispatchResult<T> = Result<T, DispatchError>;
