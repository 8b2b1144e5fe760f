use thiserror::Error;

/// NIP-19 decode/encode failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Nip19Error {
    #[error("identifier mixes upper and lower case")]
    MixedCase,

    #[error("invalid bech32: {0}")]
    Bech32(String),

    #[error("unsupported prefix: {0}")]
    UnsupportedPrefix(String),

    #[error("invalid {field} length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("missing {0} record")]
    MissingField(&'static str),

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("TLV value too long: {0} bytes (max 255)")]
    TlvValueTooLong(usize),

    #[error("encode failed: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, Nip19Error>;
