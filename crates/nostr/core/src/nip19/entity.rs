use serde::{Deserialize, Serialize};

use super::codec::{decode_bech32, encode_bech32, strip_uri_scheme};
use super::error::{Nip19Error, Result};
use super::tlv::{TLV_AUTHOR, TLV_KIND, TLV_RELAY, TLV_SPECIAL, TlvRecord, encode_tlv, parse_tlv};

const KEY_LENGTH: usize = 32;

/// Identifier types this engine decodes. `nsec` is deliberately absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Note,
    Npub,
    Nevent,
    Nprofile,
    Naddr,
}

impl EntityType {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Npub => "npub",
            Self::Nevent => "nevent",
            Self::Nprofile => "nprofile",
            Self::Naddr => "naddr",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "note" => Some(Self::Note),
            "npub" => Some(Self::Npub),
            "nevent" => Some(Self::Nevent),
            "nprofile" => Some(Self::Nprofile),
            "naddr" => Some(Self::Naddr),
            _ => None,
        }
    }

    pub fn is_composite(self) -> bool {
        matches!(self, Self::Nevent | Self::Nprofile | Self::Naddr)
    }
}

/// A successfully decoded identifier.
///
/// `primary_id` is the hex event id (`note`, `nevent`), the hex pubkey
/// (`npub`, `nprofile`) or the `kind:author:identifier` coordinate (`naddr`).
/// It is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedEntity {
    pub entity_type: EntityType,
    pub primary_id: String,
    pub source_address: String,
    pub author: Option<String>,
    pub relay_hints: Vec<String>,
    pub kind: Option<u32>,
    /// Raw `d` identifier, only set for `naddr`.
    pub identifier: Option<String>,
}

impl DecodedEntity {
    fn bare(entity_type: EntityType, primary_id: String, source_address: &str) -> Self {
        Self {
            entity_type,
            primary_id,
            source_address: strip_uri_scheme(source_address).to_string(),
            author: None,
            relay_hints: Vec::new(),
            kind: None,
            identifier: None,
        }
    }
}

/// Pointer to a regular event (`nevent`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPointer {
    pub id: String,
    pub relays: Vec<String>,
    pub author: Option<String>,
    pub kind: Option<u32>,
}

/// Pointer to a profile (`nprofile`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePointer {
    pub pubkey: String,
    pub relays: Vec<String>,
}

/// Pointer to an addressable event (`naddr`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressPointer {
    pub identifier: String,
    pub author: String,
    pub kind: u32,
    pub relays: Vec<String>,
}

/// Decode any supported identifier, with or without a `nostr:` scheme.
pub fn decode(address: &str) -> Result<DecodedEntity> {
    let (prefix, payload) = decode_bech32(address)?;
    let entity_type =
        EntityType::from_prefix(&prefix).ok_or(Nip19Error::UnsupportedPrefix(prefix))?;

    match entity_type {
        EntityType::Note | EntityType::Npub => {
            let field = if entity_type == EntityType::Note {
                "event id"
            } else {
                "pubkey"
            };
            let key = hex_key(&payload, field)?;
            Ok(DecodedEntity::bare(entity_type, key, address))
        }
        EntityType::Nevent | EntityType::Nprofile | EntityType::Naddr => {
            decode_composite(entity_type, &payload, address)
        }
    }
}

fn decode_composite(
    entity_type: EntityType,
    payload: &[u8],
    address: &str,
) -> Result<DecodedEntity> {
    let mut special: Option<Vec<u8>> = None;
    let mut author: Option<String> = None;
    let mut kind: Option<u32> = None;
    let mut relay_hints: Vec<String> = Vec::new();

    for TlvRecord { tlv_type, value } in parse_tlv(payload) {
        match tlv_type {
            TLV_SPECIAL => {
                if special.is_none() {
                    special = Some(value);
                }
            }
            TLV_RELAY => {
                if let Ok(relay) = String::from_utf8(value) {
                    let relay = relay.trim().to_string();
                    if !relay.is_empty() && !relay_hints.contains(&relay) {
                        relay_hints.push(relay);
                    }
                }
            }
            // Wrong-sized author/kind records are skipped like unknown types.
            TLV_AUTHOR => {
                if author.is_none() && value.len() == KEY_LENGTH {
                    author = Some(hex::encode(&value));
                }
            }
            TLV_KIND => {
                if kind.is_none()
                    && let Ok(bytes) = <[u8; 4]>::try_from(value.as_slice())
                {
                    kind = Some(u32::from_be_bytes(bytes));
                }
            }
            _ => {}
        }
    }

    let special = special.ok_or(Nip19Error::MissingField(match entity_type {
        EntityType::Naddr => "identifier",
        EntityType::Nprofile => "pubkey",
        _ => "event id",
    }))?;

    let mut entity = match entity_type {
        EntityType::Naddr => {
            let author = author.take().ok_or(Nip19Error::MissingField("author"))?;
            let kind = kind.ok_or(Nip19Error::MissingField("kind"))?;
            let identifier = String::from_utf8_lossy(&special).into_owned();
            let coordinate = format!("{kind}:{author}:{identifier}");
            let mut entity = DecodedEntity::bare(entity_type, coordinate, address);
            entity.author = Some(author);
            entity.identifier = Some(identifier);
            entity
        }
        EntityType::Nprofile => {
            let pubkey = hex_key(&special, "pubkey")?;
            DecodedEntity::bare(entity_type, pubkey, address)
        }
        _ => {
            let id = hex_key(&special, "event id")?;
            let mut entity = DecodedEntity::bare(entity_type, id, address);
            entity.author = author.take();
            entity
        }
    };
    entity.kind = kind;
    entity.relay_hints = relay_hints;
    Ok(entity)
}

fn hex_key(bytes: &[u8], field: &'static str) -> Result<String> {
    if bytes.len() != KEY_LENGTH {
        return Err(Nip19Error::InvalidLength {
            field,
            expected: KEY_LENGTH,
            actual: bytes.len(),
        });
    }
    Ok(hex::encode(bytes))
}

fn key_bytes(hex_value: &str, field: &'static str) -> Result<Vec<u8>> {
    let bytes =
        hex::decode(hex_value.trim()).map_err(|error| Nip19Error::InvalidHex(error.to_string()))?;
    if bytes.len() != KEY_LENGTH {
        return Err(Nip19Error::InvalidLength {
            field,
            expected: KEY_LENGTH,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

fn relay_records(relays: &[String]) -> impl Iterator<Item = TlvRecord> + '_ {
    relays
        .iter()
        .map(|relay| TlvRecord::new(TLV_RELAY, relay.as_bytes()))
}

pub fn encode_note(event_id: &str) -> Result<String> {
    encode_bech32(EntityType::Note.prefix(), &key_bytes(event_id, "event id")?)
}

pub fn encode_npub(pubkey: &str) -> Result<String> {
    encode_bech32(EntityType::Npub.prefix(), &key_bytes(pubkey, "pubkey")?)
}

pub fn encode_nevent(pointer: &EventPointer) -> Result<String> {
    let mut records = vec![TlvRecord::new(
        TLV_SPECIAL,
        key_bytes(&pointer.id, "event id")?,
    )];
    records.extend(relay_records(&pointer.relays));
    if let Some(author) = &pointer.author {
        records.push(TlvRecord::new(TLV_AUTHOR, key_bytes(author, "author")?));
    }
    if let Some(kind) = pointer.kind {
        records.push(TlvRecord::new(TLV_KIND, kind.to_be_bytes()));
    }
    encode_bech32(EntityType::Nevent.prefix(), &encode_tlv(&records)?)
}

pub fn encode_nprofile(pointer: &ProfilePointer) -> Result<String> {
    let mut records = vec![TlvRecord::new(
        TLV_SPECIAL,
        key_bytes(&pointer.pubkey, "pubkey")?,
    )];
    records.extend(relay_records(&pointer.relays));
    encode_bech32(EntityType::Nprofile.prefix(), &encode_tlv(&records)?)
}

pub fn encode_naddr(pointer: &AddressPointer) -> Result<String> {
    let mut records = vec![TlvRecord::new(
        TLV_SPECIAL,
        pointer.identifier.as_bytes(),
    )];
    records.extend(relay_records(&pointer.relays));
    records.push(TlvRecord::new(
        TLV_AUTHOR,
        key_bytes(&pointer.author, "author")?,
    ));
    records.push(TlvRecord::new(TLV_KIND, pointer.kind.to_be_bytes()));
    encode_bech32(EntityType::Naddr.prefix(), &encode_tlv(&records)?)
}
