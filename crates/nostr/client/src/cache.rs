//! Relay fetch result cache.

use lru::LruCache;
use nostr::{Event, KindClassification};
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

pub const DEFAULT_CACHE_CAPACITY: usize = 200;

/// Lookup key: an event id, or the address of a replaceable/addressable event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Id(String),
    Address {
        kind: u16,
        pubkey: String,
        identifier: String,
    },
}

impl CacheKey {
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }

    pub fn address(kind: u16, pubkey: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::Address {
            kind,
            pubkey: pubkey.into(),
            identifier: identifier.into(),
        }
    }

    /// Address key for `event`, if its kind is replaceable or addressable.
    pub fn address_of(event: &Event) -> Option<Self> {
        match event.classification() {
            KindClassification::Addressable => Some(Self::address(
                event.kind,
                event.pubkey.clone(),
                event.identifier(),
            )),
            KindClassification::Replaceable => {
                Some(Self::address(event.kind, event.pubkey.clone(), ""))
            }
            _ => None,
        }
    }
}

/// Bounded, strictly least-recently-used event cache shared across queries.
///
/// Each entry counts against capacity, so an addressable event inserted
/// under both its id and its address occupies two slots.
pub struct EventCache {
    entries: Mutex<LruCache<CacheKey, Event>>,
}

impl EventCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up `key`, marking it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Event> {
        self.lock().get(key).cloned()
    }

    /// Like [`get`](Self::get) without touching recency.
    pub fn peek(&self, key: &CacheKey) -> Option<Event> {
        self.lock().peek(key).cloned()
    }

    /// Insert under the event id and, where it applies, under its address.
    pub fn insert(&self, event: Event) {
        let mut entries = self.lock();
        if let Some(address) = CacheKey::address_of(&event) {
            let newer_cached = entries
                .peek(&address)
                .is_some_and(|cached| cached.created_at > event.created_at);
            if !newer_cached {
                entries.put(address, event.clone());
            }
        }
        entries.put(CacheKey::Id(event.id.clone()), event);
    }

    /// Insert under an explicit key only.
    pub fn insert_key(&self, key: CacheKey, event: Event) {
        self.lock().put(key, event);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<CacheKey, Event>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for EventCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
