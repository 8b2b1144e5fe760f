use crate::client::{HashSource, UploadOutcome};
use crate::hash::BlobHash;

/// What the engine knows about a stored blob after an upload.
///
/// `content_hash` is always the locally computed digest. The server's claim
/// is kept alongside so callers can detect a server that rewrote the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDescriptor {
    pub content_hash: String,
    pub byte_length: u64,
    pub mime_type: Option<String>,
    pub canonical_url: String,
    pub server_reported_hash: Option<String>,
    pub hash_source: HashSource,
}

impl BlobDescriptor {
    pub fn from_upload(hash: &BlobHash, outcome: &UploadOutcome, mime_type: Option<&str>) -> Self {
        Self {
            content_hash: hash.hex.clone(),
            byte_length: hash.length,
            mime_type: mime_type
                .map(str::to_string)
                .or_else(|| outcome.mime_type.clone()),
            canonical_url: outcome.url.clone(),
            server_reported_hash: outcome.server_hash.clone(),
            hash_source: outcome.hash_source,
        }
    }

    /// True when the server reported a hash that differs from ours.
    pub fn server_hash_diverges(&self) -> bool {
        self.server_reported_hash
            .as_deref()
            .is_some_and(|reported| !reported.eq_ignore_ascii_case(&self.content_hash))
    }
}
