//! Blossom blob transfer.
//!
//! Blobs are addressed by the SHA-256 of their bytes. Every write is
//! authorized by a kind 24242 event signed outside this crate and sent as
//! `Authorization: Nostr <base64(event json)>`. Servers disagree on paths and
//! methods, so each operation walks a fixed list of endpoints and only fails
//! once all of them have.

pub mod auth;
pub mod client;
pub mod descriptor;
pub mod error;
pub mod hash;
pub mod servers;

pub use auth::{AuthAction, AuthorizationRequest, KIND_BLOSSOM_AUTH, SignedAuthorization, authorize};
pub use client::{
    BlobClient, BlobClientConfig, Endpoint, HashSource, MultiServerReport, UploadOutcome,
    hash_from_url,
};
pub use descriptor::BlobDescriptor;
pub use error::{AttemptFailure, BlobError, FailureReason, Result};
pub use hash::{BlobHash, HASH_CHUNK_SIZE, hash_bytes, hash_file, hash_reader, is_sha256_hex};
pub use servers::{BlobServerList, SERVER_LIST_KEY};
