//! The user's preferred blob servers, persisted through the host store.

use nostr::store::KeyValueStore;
use tracing::debug;

use crate::client::normalize_server;
use crate::error::Result;

pub const SERVER_LIST_KEY: &str = "blossom:servers";

/// Ordered, de-duplicated list of blob server base URLs. The first entry is
/// the upload target; the rest receive mirrors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobServerList {
    servers: Vec<String>,
}

impl BlobServerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from arbitrary input, skipping entries that are not http(s) URLs.
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for url in urls {
            if let Err(error) = list.add(url.as_ref()) {
                debug!("skipping blob server entry: {}", error);
            }
        }
        list
    }

    /// Missing or empty records load as an empty list.
    pub fn load(store: &dyn KeyValueStore) -> Self {
        match store.get(SERVER_LIST_KEY) {
            Some(record) => Self::from_urls(record.lines()),
            None => Self::new(),
        }
    }

    pub fn save(&self, store: &dyn KeyValueStore) {
        if self.servers.is_empty() {
            store.remove(SERVER_LIST_KEY);
        } else {
            store.put(SERVER_LIST_KEY, self.servers.join("\n"));
        }
    }

    /// Returns `false` when the server was already listed.
    pub fn add(&mut self, server: &str) -> Result<bool> {
        let server = normalize_server(server)?;
        if self.servers.contains(&server) {
            return Ok(false);
        }
        self.servers.push(server);
        Ok(true)
    }

    pub fn remove(&mut self, server: &str) -> bool {
        let Ok(server) = normalize_server(server) else {
            return false;
        };
        let before = self.servers.len();
        self.servers.retain(|existing| *existing != server);
        self.servers.len() != before
    }

    pub fn primary(&self) -> Option<&str> {
        self.servers.first().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.servers.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.servers
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
