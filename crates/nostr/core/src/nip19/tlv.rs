use super::error::{Nip19Error, Result};

/// Event id, pubkey or `d` identifier depending on the entity.
pub const TLV_SPECIAL: u8 = 0;
/// Relay URL hint (UTF-8).
pub const TLV_RELAY: u8 = 1;
/// Author pubkey (32 bytes).
pub const TLV_AUTHOR: u8 = 2;
/// Event kind (32-bit big-endian).
pub const TLV_KIND: u8 = 3;

/// One `(type, length, value)` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvRecord {
    pub tlv_type: u8,
    pub value: Vec<u8>,
}

impl TlvRecord {
    pub fn new(tlv_type: u8, value: impl Into<Vec<u8>>) -> Self {
        Self {
            tlv_type,
            value: value.into(),
        }
    }
}

/// Split a decoded payload into TLV records.
///
/// Parsing stops at the last complete record: a header whose declared length
/// overruns the buffer ends the sequence instead of failing it. Unknown type
/// codes are returned as-is so callers can ignore them.
pub fn parse_tlv(bytes: &[u8]) -> Vec<TlvRecord> {
    let mut records = Vec::new();
    let mut rest = bytes;

    while let [tlv_type, length, tail @ ..] = rest {
        let length = usize::from(*length);
        if tail.len() < length {
            break;
        }
        let (value, remaining) = tail.split_at(length);
        records.push(TlvRecord::new(*tlv_type, value));
        rest = remaining;
    }

    records
}

/// Serialize records in order. Values longer than 255 bytes cannot be framed.
pub fn encode_tlv(records: &[TlvRecord]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(records.iter().map(|r| r.value.len() + 2).sum());
    for record in records {
        let length = u8::try_from(record.value.len())
            .map_err(|_| Nip19Error::TlvValueTooLong(record.value.len()))?;
        out.push(record.tlv_type);
        out.push(length);
        out.extend_from_slice(&record.value);
    }
    Ok(out)
}
