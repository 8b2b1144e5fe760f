//! External signer boundary.
//!
//! The engine never holds a private key. Anything that needs a signature is
//! handed to a [`Signer`] as an [`UnsignedEvent`] tagged with a request id,
//! and comes back either fully signed, as a bare signature, or as a rejection.

use async_trait::async_trait;
use thiserror::Error;

use crate::nip01::{Event, UnsignedEvent};

/// Signer failures surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    #[error("user rejected the signing request")]
    UserRejected,

    #[error("signer is not logged in")]
    NotLoggedIn,

    #[error("invalid signer response: {0}")]
    InvalidResponse(String),
}

/// One signing exchange, correlated by `request_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub request_id: String,
    pub event: UnsignedEvent,
}

impl SignRequest {
    pub fn new(event: UnsignedEvent) -> Self {
        Self {
            request_id: hex::encode(rand::random::<[u8; 16]>()),
            event,
        }
    }
}

/// What a signer may hand back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignResponse {
    Signed(Event),
    Signature(String),
}

#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, request: SignRequest) -> Result<SignResponse, SignerError>;
}

/// Ask `signer` to sign `unsigned` and return the complete event.
///
/// A bare signature is combined with the locally computed id. A fully signed
/// event is only accepted when its id and pubkey match what was requested.
pub async fn sign_event(signer: &dyn Signer, unsigned: UnsignedEvent) -> Result<Event, SignerError> {
    let expected_id = unsigned
        .compute_id()
        .map_err(|error| SignerError::InvalidResponse(error.to_string()))?;
    let request = SignRequest::new(unsigned.clone());

    match signer.sign(request).await? {
        SignResponse::Signature(sig) => {
            if sig.trim().is_empty() {
                return Err(SignerError::InvalidResponse("empty signature".to_string()));
            }
            Ok(unsigned.into_event(expected_id, sig))
        }
        SignResponse::Signed(event) => {
            if event.id != expected_id {
                return Err(SignerError::InvalidResponse(format!(
                    "signed event id {} does not match requested {}",
                    event.id, expected_id
                )));
            }
            if event.pubkey != unsigned.pubkey {
                return Err(SignerError::InvalidResponse(format!(
                    "signed event pubkey {} does not match requested {}",
                    event.pubkey, unsigned.pubkey
                )));
            }
            Ok(event)
        }
    }
}
