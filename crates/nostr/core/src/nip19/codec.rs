use bech32::primitives::decode::CheckedHrpstring;
use bech32::{Bech32, Checksum, Hrp};

use super::error::{Nip19Error, Result};

/// URI scheme that may wrap an identifier in shared text.
pub const URI_SCHEME: &str = "nostr:";

/// Longest identifier accepted, prefix and checksum included.
pub const MAX_IDENTIFIER_LENGTH: usize = 5000;

/// The bech32 checksum without BIP-173's 90/1023 character cap.
///
/// Composite identifiers carry several relay hints and a free-form `d` value,
/// which routinely exceeds what a segwit address is allowed to be.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Nip19Checksum {}

impl Checksum for Nip19Checksum {
    type MidstateRepr = u32;
    const CODE_LENGTH: usize = MAX_IDENTIFIER_LENGTH;
    const CHECKSUM_LENGTH: usize = <Bech32 as Checksum>::CHECKSUM_LENGTH;
    const GENERATOR_SH: [u32; 5] = <Bech32 as Checksum>::GENERATOR_SH;
    const TARGET_RESIDUE: u32 = <Bech32 as Checksum>::TARGET_RESIDUE;
}

/// Remove an optional `nostr:` scheme, matching it case-insensitively.
pub fn strip_uri_scheme(address: &str) -> &str {
    let trimmed = address.trim();
    match trimmed.get(..URI_SCHEME.len()) {
        Some(scheme) if scheme.eq_ignore_ascii_case(URI_SCHEME) => &trimmed[URI_SCHEME.len()..],
        _ => trimmed,
    }
}

/// Decode a bech32 string into its lowercase prefix and payload bytes.
///
/// Mixed-case input is refused before the checksum is looked at; an unknown
/// data character or a bad checksum is a decode error. The six checksum
/// symbols are not part of the returned payload.
pub fn decode_bech32(address: &str) -> Result<(String, Vec<u8>)> {
    let address = strip_uri_scheme(address);
    let has_upper = address.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = address.chars().any(|c| c.is_ascii_lowercase());
    if has_upper && has_lower {
        return Err(Nip19Error::MixedCase);
    }

    let normalized = address.to_ascii_lowercase();
    let checked = CheckedHrpstring::new::<Nip19Checksum>(&normalized)
        .map_err(|error| Nip19Error::Bech32(error.to_string()))?;
    let prefix = checked.hrp().to_lowercase();
    let payload = checked.byte_iter().collect();
    Ok((prefix, payload))
}

/// Encode payload bytes under `prefix` with a freshly computed checksum.
pub fn encode_bech32(prefix: &str, payload: &[u8]) -> Result<String> {
    let hrp = Hrp::parse(prefix).map_err(|error| Nip19Error::Encode(error.to_string()))?;
    bech32::encode::<Nip19Checksum>(hrp, payload)
        .map_err(|error| Nip19Error::Encode(error.to_string()))
}
