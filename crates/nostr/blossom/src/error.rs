use crate::client::Endpoint;
use nostr::SignerError;
use std::fmt;
use thiserror::Error;

/// Why one endpoint attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Status { status: u16, body: String },
    Transport(String),
    InvalidResponse(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { status, body } if body.is_empty() => write!(f, "HTTP {status}"),
            Self::Status { status, body } => write!(f, "HTTP {status}: {body}"),
            Self::Transport(message) => write!(f, "transport: {message}"),
            Self::InvalidResponse(message) => write!(f, "invalid response: {message}"),
        }
    }
}

/// One entry of the attempt ledger kept while walking a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub server: String,
    pub endpoint: Endpoint,
    pub reason: FailureReason,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.endpoint, self.server, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob server URL: {0}")]
    InvalidServer(String),

    #[error("no blob servers configured")]
    NoServers,

    #[error("invalid authorization: {0}")]
    InvalidAuthorization(String),

    #[error("signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("{operation} failed on every endpoint: {}", render_attempts(.attempts))]
    AllAttemptsFailed {
        operation: &'static str,
        attempts: Vec<AttemptFailure>,
    },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BlobError {
    /// The attempt ledger, empty for errors raised before any request was sent.
    pub fn attempts(&self) -> &[AttemptFailure] {
        match self {
            Self::AllAttemptsFailed { attempts, .. } => attempts,
            _ => &[],
        }
    }
}

fn render_attempts(attempts: &[AttemptFailure]) -> String {
    if attempts.is_empty() {
        return "no endpoints tried".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, BlobError>;

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;

    #[test]
    fn ledger_renders_in_attempt_order() {
        let error = BlobError::AllAttemptsFailed {
            operation: "upload",
            attempts: vec![
                AttemptFailure {
                    server: "https://cdn.example".to_string(),
                    endpoint: Endpoint::new(Method::PUT, "/upload"),
                    reason: FailureReason::Status {
                        status: 404,
                        body: String::new(),
                    },
                },
                AttemptFailure {
                    server: "https://cdn.example".to_string(),
                    endpoint: Endpoint::new(Method::POST, "/upload"),
                    reason: FailureReason::Transport("connection reset".to_string()),
                },
            ],
        };
        assert_eq!(
            error.to_string(),
            "upload failed on every endpoint: PUT /upload https://cdn.example: HTTP 404; \
             POST /upload https://cdn.example: transport: connection reset"
        );
        assert_eq!(error.attempts().len(), 2);
        assert!(BlobError::NoServers.attempts().is_empty());
    }
}
