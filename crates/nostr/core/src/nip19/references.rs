use std::sync::LazyLock;

use regex::Regex;

use super::entity::{DecodedEntity, decode};

static REFERENCE_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:nostr:)?((?:npub|note|nevent|nprofile|naddr)1[02-9ac-hj-np-z]{6,})\b")
        .ok()
});

/// Decode every identifier mentioned in free text, in order of appearance.
///
/// Matches that fail to decode (bad checksum, mixed case, truncated payload)
/// are skipped. Repeated mentions of the same identifier are returned once.
pub fn extract_references(text: &str) -> Vec<DecodedEntity> {
    let Some(pattern) = REFERENCE_PATTERN.as_ref() else {
        return Vec::new();
    };

    let mut found: Vec<DecodedEntity> = Vec::new();
    for captures in pattern.captures_iter(text) {
        let Some(candidate) = captures.get(1) else {
            continue;
        };
        if let Ok(entity) = decode(candidate.as_str())
            && !found
                .iter()
                .any(|existing| existing.source_address == entity.source_address)
        {
            found.push(entity);
        }
    }
    found
}
