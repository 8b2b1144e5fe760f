//! Multi-relay fan-out with merge policies.
//!
//! A query runs one [`session`](crate::session) per relay. Every session
//! feeds one fan-in channel; the caller's task merges what arrives until all
//! sessions have finished or the deadline passes. Dropping the receiving end
//! is the cancellation signal: sessions still running notice the closed
//! channel, send `CLOSE` and release their sockets.

use crate::cache::{CacheKey, EventCache};
use crate::error::Result;
use crate::filter::Filter;
use crate::relay::{PublishConfirmation, RelayConfig, RelayConnection};
use crate::session::{self, SessionEnd, SessionOutcome};
use futures_util::future::join_all;
use nostr::nip19::{DecodedEntity, EntityType};
use nostr::{Event, KIND_METADATA, KIND_RELAY_LIST, KindClassification};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::debug;

/// Fan-out configuration.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Sessions allowed to run at once within one query.
    pub max_concurrent_relays: usize,
    /// Per-relay connection settings.
    pub relay_config: RelayConfig,
    /// Deadline for single-record lookups.
    pub lookup_timeout: Duration,
    /// Deadline for timeline queries.
    pub timeline_timeout: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_concurrent_relays: 16,
            relay_config: RelayConfig::default(),
            lookup_timeout: Duration::from_secs(5),
            timeline_timeout: Duration::from_secs(8),
        }
    }
}

/// How records from different relays are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Race the relays; the first usable record wins and the rest are cancelled.
    FirstNonEmpty,
    /// Keep every distinct event id.
    UnionDedup,
    /// Keep only the record with the greatest `created_at`.
    NewestWins,
}

/// Merged result of one fan-out query. An empty result is not an error.
#[derive(Debug, Clone, Default)]
pub struct MergedResult {
    pub events: Vec<Event>,
    /// Relays that answered with end-of-stored or an explicit close.
    pub responded: usize,
    /// Sessions that finished, whatever the reason.
    pub completed: usize,
    pub targets: usize,
    /// The deadline elapsed before every session finished.
    pub timed_out: bool,
    pub outcomes: Vec<SessionOutcome>,
}

impl MergedResult {
    pub fn first(&self) -> Option<&Event> {
        self.events.first()
    }

    pub fn into_first(self) -> Option<Event> {
        self.events.into_iter().next()
    }
}

enum FanIn {
    Event(Event),
    Done(SessionOutcome),
}

enum Merger {
    First(Option<Event>),
    Union {
        seen: HashSet<String>,
        events: Vec<Event>,
    },
    Newest(Option<Event>),
}

impl Merger {
    fn new(policy: MergePolicy) -> Self {
        match policy {
            MergePolicy::FirstNonEmpty => Self::First(None),
            MergePolicy::UnionDedup => Self::Union {
                seen: HashSet::new(),
                events: Vec::new(),
            },
            MergePolicy::NewestWins => Self::Newest(None),
        }
    }

    fn offer(&mut self, event: Event) {
        match self {
            Self::First(slot) => {
                if slot.is_none() {
                    *slot = Some(event);
                }
            }
            Self::Union { seen, events } => {
                if seen.insert(event.id.clone()) {
                    events.push(event);
                }
            }
            // Ties go to the record seen last.
            Self::Newest(slot) => {
                if slot
                    .as_ref()
                    .is_none_or(|current| event.created_at >= current.created_at)
                {
                    *slot = Some(event);
                }
            }
        }
    }

    fn is_satisfied(&self) -> bool {
        matches!(self, Self::First(Some(_)))
    }

    fn finish(self) -> Vec<Event> {
        match self {
            Self::First(slot) | Self::Newest(slot) => slot.into_iter().collect(),
            Self::Union { events, .. } => events,
        }
    }
}

/// Timeline request parameters.
#[derive(Debug, Clone, Default)]
pub struct TimelineQuery {
    pub authors: Vec<String>,
    pub kinds: Vec<u16>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<usize>,
}

impl TimelineQuery {
    pub fn to_filter(&self) -> Filter {
        let mut filter = Filter::new();
        if !self.authors.is_empty() {
            filter = filter.authors(self.authors.iter().cloned());
        }
        if !self.kinds.is_empty() {
            filter = filter.kinds(self.kinds.iter().copied());
        }
        filter.since = self.since;
        filter.until = self.until;
        filter.limit = self.limit;
        filter
    }
}

/// Issues one logical query to many relays and merges the answers.
pub struct FanoutCoordinator {
    config: FanoutConfig,
    cache: Arc<EventCache>,
}

impl FanoutCoordinator {
    pub fn new(config: FanoutConfig) -> Self {
        Self::with_cache(config, Arc::new(EventCache::default()))
    }

    pub fn with_cache(config: FanoutConfig, cache: Arc<EventCache>) -> Self {
        Self { config, cache }
    }

    pub fn config(&self) -> &FanoutConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<EventCache> {
        &self.cache
    }

    /// Run `filters` against every target and merge under `policy`.
    ///
    /// Returns when every session has finished, when `FirstNonEmpty` has its
    /// record, or at `timeout`, whichever comes first.
    pub async fn query<I, S>(
        &self,
        targets: I,
        filters: Vec<Filter>,
        policy: MergePolicy,
        timeout: Duration,
    ) -> MergedResult
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let targets = normalize_targets(targets);
        let total = targets.len();
        let mut result = MergedResult {
            targets: total,
            ..MergedResult::default()
        };
        if total == 0 {
            return result;
        }

        let deadline = Instant::now() + timeout;
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_relays.max(1)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        for url in targets {
            tasks.spawn(run_relay(
                url,
                filters.clone(),
                self.config.relay_config.clone(),
                deadline,
                Arc::clone(&permits),
                tx.clone(),
            ));
        }
        drop(tx);

        let mut merger = Merger::new(policy);
        while result.completed < total {
            match timeout_at(deadline, rx.recv()).await {
                Err(_) => {
                    result.timed_out = true;
                    break;
                }
                Ok(None) => break,
                Ok(Some(FanIn::Event(event))) => {
                    merger.offer(event);
                    if merger.is_satisfied() {
                        break;
                    }
                }
                Ok(Some(FanIn::Done(outcome))) => {
                    result.completed += 1;
                    if outcome.end.relay_answered() {
                        result.responded += 1;
                    }
                    result.outcomes.push(outcome);
                }
            }
        }

        drop(rx);
        reap(tasks, self.config.relay_config.close_timeout);

        result.events = merger.finish();
        debug!(
            "fan-out {:?}: {} events, {}/{} sessions done, timed_out={}",
            policy,
            result.events.len(),
            result.completed,
            total,
            result.timed_out
        );
        result
    }

    /// Look up one event by id, racing the relays. Cache hits skip the network.
    pub async fn fetch_event<I, S>(&self, targets: I, id: &str) -> Option<Event>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key = CacheKey::id(id);
        if let Some(cached) = self.cache.get(&key) {
            return Some(cached);
        }
        let filter = Filter::new().ids([id]).limit(1);
        let event = self
            .query(
                targets,
                vec![filter],
                MergePolicy::FirstNonEmpty,
                self.config.lookup_timeout,
            )
            .await
            .into_first()?;
        self.cache.insert(event.clone());
        Some(event)
    }

    /// Latest version of a replaceable or addressable record.
    pub async fn fetch_addressable<I, S>(
        &self,
        targets: I,
        kind: u16,
        author: &str,
        identifier: &str,
    ) -> Option<Event>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key = CacheKey::address(kind, author, identifier);
        if let Some(cached) = self.cache.get(&key) {
            return Some(cached);
        }

        let mut filter = Filter::new().kinds([kind]).authors([author]);
        if KindClassification::of(kind) == KindClassification::Addressable {
            filter = filter.tag('d', [identifier]);
        }
        let event = self
            .query(
                targets,
                vec![filter],
                MergePolicy::NewestWins,
                self.config.lookup_timeout,
            )
            .await
            .into_first()?;
        self.cache.insert(event.clone());
        Some(event)
    }

    /// Kind 0 profile metadata.
    pub async fn fetch_profile<I, S>(&self, targets: I, pubkey: &str) -> Option<Event>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.fetch_addressable(targets, KIND_METADATA, pubkey, "")
            .await
    }

    /// Kind 10002 relay list. See [`relay_list_urls`].
    pub async fn fetch_relay_list<I, S>(&self, targets: I, pubkey: &str) -> Option<Event>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.fetch_addressable(targets, KIND_RELAY_LIST, pubkey, "")
            .await
    }

    /// Union of every relay's answer, newest first, truncated to `limit`.
    pub async fn fetch_timeline<I, S>(&self, targets: I, query: &TimelineQuery) -> MergedResult
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut result = self
            .query(
                targets,
                vec![query.to_filter()],
                MergePolicy::UnionDedup,
                self.config.timeline_timeout,
            )
            .await;
        result.events.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = query.limit {
            result.events.truncate(limit);
        }
        result
    }

    /// Fetch whatever a decoded identifier points at.
    ///
    /// Relay hints carried by the identifier are tried alongside
    /// `fallback_targets`. Profiles resolve to their kind 0 record.
    pub async fn resolve_entity<I, S>(
        &self,
        entity: &DecodedEntity,
        fallback_targets: I,
    ) -> Option<Event>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut candidates = entity.relay_hints.clone();
        candidates.extend(
            fallback_targets
                .into_iter()
                .map(|target| target.as_ref().to_string()),
        );
        let targets = normalize_targets(candidates);

        match entity.entity_type {
            EntityType::Note | EntityType::Nevent => {
                self.fetch_event(&targets, &entity.primary_id).await
            }
            EntityType::Npub | EntityType::Nprofile => {
                self.fetch_profile(&targets, &entity.primary_id).await
            }
            EntityType::Naddr => {
                let author = entity.author.as_deref()?;
                let kind = u16::try_from(entity.kind?).ok()?;
                let identifier = entity.identifier.as_deref().unwrap_or_default();
                self.fetch_addressable(&targets, kind, author, identifier)
                    .await
            }
        }
    }

    /// Publish to every target concurrently and wait for each `OK`.
    ///
    /// Connection failures and timeouts come back as non-accepted confirmations.
    pub async fn publish<I, S>(
        &self,
        targets: I,
        event: &Event,
        wait: Duration,
    ) -> Vec<PublishConfirmation>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_relays.max(1)));
        let publishes = normalize_targets(targets).into_iter().map(|url| {
            let permits = Arc::clone(&permits);
            let relay_config = self.config.relay_config.clone();
            async move {
                let _permit = permits.acquire_owned().await.ok();
                let attempt = timeout(wait, publish_one(&url, relay_config, event, wait)).await;
                let failure = match attempt {
                    Ok(Ok(confirmation)) => return confirmation,
                    Ok(Err(error)) => error.to_string(),
                    Err(_) => format!("no OK within {:?}", wait),
                };
                debug!("publish of {} to {} failed: {}", event.id, url, failure);
                PublishConfirmation {
                    relay_url: url,
                    event_id: event.id.clone(),
                    accepted: false,
                    message: failure,
                }
            }
        });
        join_all(publishes).await
    }
}

impl Default for FanoutCoordinator {
    fn default() -> Self {
        Self::new(FanoutConfig::default())
    }
}

async fn publish_one(
    url: &str,
    relay_config: RelayConfig,
    event: &Event,
    wait: Duration,
) -> Result<PublishConfirmation> {
    let relay = RelayConnection::with_config(url, relay_config)?;
    relay.connect().await?;
    let confirmation = relay.publish(event, wait).await;
    relay.disconnect().await;
    confirmation
}

async fn run_relay(
    url: String,
    filters: Vec<Filter>,
    relay_config: RelayConfig,
    deadline: Instant,
    permits: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<FanIn>,
) {
    let permit = tokio::select! {
        biased;
        () = tx.closed() => None,
        permit = timeout_at(deadline, permits.acquire_owned()) => {
            permit.ok().and_then(std::result::Result::ok)
        }
    };

    let outcome = match permit {
        Some(_permit) => {
            let events = tx.clone();
            session::fetch_until(
                &url,
                filters,
                &relay_config,
                deadline,
                tx.closed(),
                move |event| {
                    let _ = events.send(FanIn::Event(event));
                },
            )
            .await
        }
        None => SessionOutcome {
            relay: url,
            delivered: 0,
            end: if tx.is_closed() {
                SessionEnd::Cancelled
            } else {
                SessionEnd::Deadline
            },
        },
    };
    let _ = tx.send(FanIn::Done(outcome));
}

/// Give cancelled sessions a bounded window to close cleanly, then abort.
fn reap(mut tasks: JoinSet<()>, grace: Duration) {
    if tasks.is_empty() {
        return;
    }
    tokio::spawn(async move {
        let drained = timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            debug!("aborting {} sessions that outlived their query", tasks.len());
        }
    });
}

/// Trim, drop trailing `/`, and de-duplicate relay URLs, keeping first-seen order.
pub fn normalize_targets<I, S>(targets: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    targets
        .into_iter()
        .filter_map(|target| {
            let normalized = target.as_ref().trim().trim_end_matches('/').to_string();
            (!normalized.is_empty() && seen.insert(normalized.clone())).then_some(normalized)
        })
        .collect()
}

/// Relay URLs listed in a kind 10002 event's `r` tags.
pub fn relay_list_urls(event: &Event) -> Vec<String> {
    normalize_targets(event.tag_values("r"))
}
