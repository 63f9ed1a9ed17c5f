//! Transport error types.

use thiserror::Error;

/// Errors raised while delivering a message to the messaging API.
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTP request failed (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    /// API answered with an error
    #[error("API error: {status} - {description}")]
    Api { status: u16, description: String },

    /// The message cannot be expressed as an API request
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// No bot token configured
    #[error("Missing bot token")]
    MissingToken,

    /// Base URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        // Request URLs embed the bot token.
        Self::Http(err.without_url())
    }
}

/// Result type alias using TransportError.
pub type TransportResult<T> = Result<T, TransportError>;
