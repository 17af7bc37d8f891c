//! Error types for the chat client.
//!
//! Every hard failure of an exchange maps onto one of these variants. The
//! controller converts them into a transcript message at its boundary, so
//! none of them reach the caller of [`crate::controller::ChatController::send`].

use thiserror::Error;

/// Chat client error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Request construction or network failure before any response arrived.
    #[error("{0}")]
    Request(#[from] reqwest::Error),

    /// Invalid backend URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend answered with a failing status.
    #[error("HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, if it could be read.
        message: String,
    },

    /// Backend answered successfully but there is no body to stream.
    #[error("No response body to stream")]
    StreamUnavailable,

    /// Transport failure while reading the event stream.
    #[error("Stream read failed: {0}")]
    Decode(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type alias for chat client operations.
pub type Result<T> = std::result::Result<T, Error>;
