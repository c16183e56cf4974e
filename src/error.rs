//! Error taxonomy shared by every layer of the client.

use thiserror::Error;

/// Errors that can occur while building, validating, or sending commands.
///
/// Correlation timeouts are absent: a reply that never arrives
/// surfaces as [`crate::rpc::Reply::NoResponse`], not as an error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid arg `{arg}` for `{kind}`")]
    Validation { kind: String, arg: String },

    #[error("malformed celery script: {0}")]
    MalformedScript(String),

    #[error("could not connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("failed to send request: {0}")]
    Send(#[source] std::io::Error),

    #[error("failed to receive response: {0}")]
    Receive(#[source] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("response pipe closed")]
    ResponseClosed,

    #[error("failed to serialize request: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to deserialize response: {0}")]
    Deserialize(#[source] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid {endpoint} request ({status})")]
    Remote { endpoint: String, status: String },

    #[error("{0}")]
    Unavailable(String),
}

impl Error {
    /// Build a validation error for an argument of a command kind.
    pub fn validation(kind: impl Into<String>, arg: impl std::fmt::Display) -> Self {
        Self::Validation {
            kind: kind.into(),
            arg: arg.to_string(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
