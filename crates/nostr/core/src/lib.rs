//! Nostr protocol primitives used by the relay and blob clients.
//!
//! - `nip01`: event model, kind classification, canonical event id
//! - `nip19`: bech32 identifiers (`note`, `npub`, `nevent`, `nprofile`, `naddr`)
//! - `signer`: delegation boundary to an external signer
//! - `store`: key-value persistence boundary owned by the host

pub mod nip01;
pub mod nip19;
pub mod signer;
pub mod store;
mod tag_parsing;

pub use nip01::{
    Event, EventTemplate, KIND_CONTACTS, KIND_METADATA, KIND_RELAY_LIST, KIND_TEXT_NOTE,
    KindClassification, UnsignedEvent, unix_now_secs,
};
pub use nip19::{DecodedEntity, EntityType, Nip19Error};
pub use signer::{SignRequest, SignResponse, Signer, SignerError, sign_event};
pub use store::{KeyValueStore, MemoryStore};
pub use tag_parsing::tag;
