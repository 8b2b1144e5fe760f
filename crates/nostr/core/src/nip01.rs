//! NIP-01: basic event model.
//!
//! Events are treated as opaque, untrusted records. This module only reads
//! tag values and computes the canonical event hash; it never signs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::tag_parsing::{collect_tag_values, find_tag_value, parse_tag_value};

/// Kind 0: user metadata (profile).
pub const KIND_METADATA: u16 = 0;
/// Kind 1: short text note.
pub const KIND_TEXT_NOTE: u16 = 1;
/// Kind 3: follow list.
pub const KIND_CONTACTS: u16 = 3;
/// Kind 10002: relay list metadata (NIP-65).
pub const KIND_RELAY_LIST: u16 = 10_002;

/// A signed Nostr event as received from a relay or a signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// First value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        find_tag_value(&self.tags, name)
    }

    /// Every first value of tags named `name`, in tag order.
    pub fn tag_values(&self, name: &str) -> Vec<String> {
        collect_tag_values(&self.tags, name)
    }

    /// First value of tag `name` parsed as `T`.
    pub fn parse_tag<T: FromStr>(&self, name: &str) -> Option<T> {
        parse_tag_value(&self.tags, name)
    }

    /// The `d` identifier of an addressable event. Missing `d` tags read as empty.
    pub fn identifier(&self) -> &str {
        self.tag_value("d").unwrap_or_default()
    }

    pub fn classification(&self) -> KindClassification {
        KindClassification::of(self.kind)
    }

    /// `kind:pubkey:identifier` for replaceable and addressable events.
    pub fn coordinate(&self) -> Option<String> {
        match self.classification() {
            KindClassification::Addressable => Some(format!(
                "{}:{}:{}",
                self.kind,
                self.pubkey,
                self.identifier()
            )),
            KindClassification::Replaceable => {
                Some(format!("{}:{}:", self.kind, self.pubkey))
            }
            _ => None,
        }
    }
}

/// How relays treat an event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindClassification {
    Regular,
    Replaceable,
    Ephemeral,
    Addressable,
}

impl KindClassification {
    pub fn of(kind: u16) -> Self {
        match kind {
            0 | 3 | 10_000..=19_999 => Self::Replaceable,
            20_000..=29_999 => Self::Ephemeral,
            30_000..=39_999 => Self::Addressable,
            _ => Self::Regular,
        }
    }
}

/// Event content without author or signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl EventTemplate {
    pub fn with_pubkey(self, pubkey: impl Into<String>) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: pubkey.into(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
        }
    }
}

/// An event ready to be handed to an external signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl UnsignedEvent {
    /// Hex SHA-256 of the canonical `[0,pubkey,created_at,kind,tags,content]` array.
    pub fn compute_id(&self) -> Result<String, serde_json::Error> {
        let canonical = serde_json::to_string(&serde_json::json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content
        ]))?;
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    /// Attach an id and signature produced elsewhere.
    pub fn into_event(self, id: String, sig: String) -> Event {
        Event {
            id,
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig,
        }
    }
}

/// Seconds since the Unix epoch.
pub fn unix_now_secs() -> Result<u64, std::time::SystemTimeError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: u16, tags: Vec<Vec<String>>) -> Event {
        Event {
            id: "id".to_string(),
            pubkey: "pk".to_string(),
            created_at: 10,
            kind,
            tags,
            content: String::new(),
            sig: "sig".to_string(),
        }
    }

    #[test]
    fn kind_ranges_classify() {
        assert_eq!(KindClassification::of(1), KindClassification::Regular);
        assert_eq!(KindClassification::of(0), KindClassification::Replaceable);
        assert_eq!(KindClassification::of(10_002), KindClassification::Replaceable);
        assert_eq!(KindClassification::of(20_001), KindClassification::Ephemeral);
        assert_eq!(KindClassification::of(30_023), KindClassification::Addressable);
        assert_eq!(KindClassification::of(40_000), KindClassification::Regular);
    }

    #[test]
    fn coordinate_uses_d_tag() {
        let article = event(30_023, vec![vec!["d".to_string(), "intro".to_string()]]);
        assert_eq!(article.coordinate().as_deref(), Some("30023:pk:intro"));

        let untagged = event(30_023, vec![]);
        assert_eq!(untagged.coordinate().as_deref(), Some("30023:pk:"));

        assert_eq!(event(1, vec![]).coordinate(), None);
    }

    #[test]
    fn compute_id_matches_canonical_serialization() -> Result<(), serde_json::Error> {
        let unsigned = EventTemplate {
            created_at: 1_700_000_000,
            kind: 1,
            tags: vec![vec!["t".to_string(), "nostr".to_string()]],
            content: "hello".to_string(),
        }
        .with_pubkey("ab".repeat(32));

        let canonical = format!(
            "[0,\"{}\",1700000000,1,[[\"t\",\"nostr\"]],\"hello\"]",
            "ab".repeat(32)
        );
        let expected = hex::encode(Sha256::digest(canonical.as_bytes()));
        assert_eq!(unsigned.compute_id()?, expected);
        Ok(())
    }

    #[test]
    fn event_deserializes_from_wire_json() -> Result<(), serde_json::Error> {
        let parsed: Event = serde_json::from_str(
            r#"{"id":"a","pubkey":"b","created_at":5,"kind":1,"tags":[["e","x"],["p"]],"content":"c","sig":"s"}"#,
        )?;
        assert_eq!(parsed.tag_value("e"), Some("x"));
        assert_eq!(parsed.tag_value("p"), None);
        Ok(())
    }
}
