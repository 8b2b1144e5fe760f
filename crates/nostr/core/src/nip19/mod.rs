//! NIP-19: bech32-encoded entities
//!
//! Human-shareable identifiers of the form `<prefix>1<data><checksum>`.
//! Plain entities (`note`, `npub`) carry a single 32-byte key; composite
//! entities (`nevent`, `nprofile`, `naddr`) carry a TLV payload with relay
//! hints, an optional author and an optional kind.
//!
//! Internal module boundaries:
//! - `error`: decode/encode error and result types
//! - `codec`: bech32 layer (case rules, checksum, 5/8-bit repacking)
//! - `tlv`: type-length-value records inside composite payloads
//! - `entity`: typed decode and per-type encoders
//! - `references`: identifier extraction from free text
//! - `tests`: codec and entity coverage
//!
//! Unknown TLV types are ignored so identifiers minted by newer clients still
//! decode. An `naddr` without both author and kind records is a decode error.
//!
//! # References
//!
//! - NIP-19: <https://github.com/nostr-protocol/nips/blob/master/19.md>

mod codec;
mod entity;
mod error;
mod references;
mod tlv;

pub use codec::{
    MAX_IDENTIFIER_LENGTH, Nip19Checksum, URI_SCHEME, decode_bech32, encode_bech32,
    strip_uri_scheme,
};
pub use entity::{
    AddressPointer, DecodedEntity, EntityType, EventPointer, ProfilePointer, decode, encode_naddr,
    encode_nevent, encode_note, encode_nprofile, encode_npub,
};
pub use error::{Nip19Error, Result};
pub use references::extract_references;
pub use tlv::{TLV_AUTHOR, TLV_KIND, TLV_RELAY, TLV_SPECIAL, TlvRecord, encode_tlv, parse_tlv};
