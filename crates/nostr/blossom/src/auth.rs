//! Kind 24242 authorization events.
//!
//! The engine builds the unsigned skeleton; an external [`Signer`] signs it.
//! The signed event is treated as an opaque bearer credential.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use nostr::{Event, EventTemplate, Signer, UnsignedEvent, sign_event, tag};

use crate::error::{BlobError, Result};

pub const KIND_BLOSSOM_AUTH: u16 = 24_242;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    Upload,
    Delete,
}

impl AuthAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Delete => "delete",
        }
    }
}

/// Builder for an authorization skeleton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub action: AuthAction,
    pub hash: String,
    pub expiration: u64,
    pub size: Option<u64>,
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub server: Option<String>,
    pub content: Option<String>,
}

impl AuthorizationRequest {
    /// Authorization for `action` on `hash`, expiring `ttl_secs` after `now`.
    pub fn new(action: AuthAction, hash: impl Into<String>, now: u64, ttl_secs: u64) -> Self {
        Self {
            action,
            hash: hash.into().to_ascii_lowercase(),
            expiration: now.saturating_add(ttl_secs),
            size: None,
            name: None,
            mime_type: None,
            server: None,
            content: None,
        }
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Restrict the authorization to one server domain.
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn to_unsigned(&self, pubkey: impl Into<String>, created_at: u64) -> UnsignedEvent {
        let mut tags = vec![
            tag("t", self.action.as_str()),
            tag("expiration", self.expiration.to_string()),
            tag("x", self.hash.clone()),
        ];
        if let Some(size) = self.size {
            tags.push(tag("size", size.to_string()));
        }
        if let Some(name) = &self.name {
            tags.push(tag("name", name.clone()));
        }
        if let Some(mime_type) = &self.mime_type {
            tags.push(tag("m", mime_type.clone()));
        }
        if let Some(server) = &self.server {
            tags.push(tag("server", server.clone()));
        }

        let content = self.content.clone().unwrap_or_else(|| match self.action {
            AuthAction::Upload => match &self.name {
                Some(name) => format!("Upload {name}"),
                None => "Upload blob".to_string(),
            },
            AuthAction::Delete => format!("Delete {}", self.hash),
        });

        EventTemplate {
            created_at,
            kind: KIND_BLOSSOM_AUTH,
            tags,
            content,
        }
        .with_pubkey(pubkey)
    }
}

/// A signed authorization ready to be attached to requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedAuthorization {
    event: Event,
}

impl SignedAuthorization {
    pub fn new(event: Event) -> Result<Self> {
        if event.kind != KIND_BLOSSOM_AUTH {
            return Err(BlobError::InvalidAuthorization(format!(
                "expected kind {}, got {}",
                KIND_BLOSSOM_AUTH, event.kind
            )));
        }
        if event.sig.trim().is_empty() {
            return Err(BlobError::InvalidAuthorization(
                "event is not signed".to_string(),
            ));
        }
        Ok(Self { event })
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn action(&self) -> Option<&str> {
        self.event.tag_value("t")
    }

    pub fn expiration(&self) -> Option<u64> {
        self.event.parse_tag("expiration")
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expiration().is_none_or(|expiration| expiration <= now)
    }

    /// Whether this credential names `hash` in an `x` tag.
    pub fn covers(&self, hash: &str) -> bool {
        self.event
            .tag_values("x")
            .iter()
            .any(|value| value.eq_ignore_ascii_case(hash))
    }

    /// `Nostr <base64(event json)>`
    pub fn header_value(&self) -> Result<String> {
        let json = serde_json::to_string(&self.event)?;
        Ok(format!("Nostr {}", STANDARD.encode(json)))
    }
}

/// Build, sign and wrap an authorization through `signer`.
pub async fn authorize(
    signer: &dyn Signer,
    pubkey: &str,
    request: &AuthorizationRequest,
) -> Result<SignedAuthorization> {
    let created_at = nostr::unix_now_secs()
        .map_err(|error| BlobError::InvalidAuthorization(format!("system clock: {error}")))?;
    let unsigned = request.to_unsigned(pubkey, created_at);
    let event = sign_event(signer, unsigned).await?;
    SignedAuthorization::new(event)
}
