//! Client error types.
//!
//! Only setup problems surface as errors. A relay that times out, sends
//! garbage, or drops the connection mid-query yields an outcome value
//! (see `SessionEnd`), not a `ClientError`.

use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("timeout error: {0}")]
    Timeout(String),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Client result type.
pub type Result<T> = std::result::Result<T, ClientError>;
