//! Transport error types.

use thiserror::Error;

/// Transport error type.
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status
    #[error("Publish rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Endpoint URL could not be parsed
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Publisher could not be configured
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using TransportError.
pub type TransportResult<T> = Result<T, TransportError>;
