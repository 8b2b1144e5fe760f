//! Backward pagination through a relay's history.
//!
//! Each relay is walked on a single connection: request a window bounded by
//! `until = watermark`, drain it, move the watermark just below the oldest
//! record seen and ask again. The walk stops when a window comes back empty
//! or short at the watermark, when the relay answers above the watermark (it
//! ignores `until`), on an explicit `CLOSED`, on connection loss, or when the
//! per-relay budget runs out.

use crate::fanout::normalize_targets;
use crate::filter::Filter;
use crate::relay::RelayConfig;
use crate::session::RelaySession;
use crate::subscription::SubscriptionFrame;
use nostr::{Event, KeyValueStore};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// `limit` sent with every window.
    pub page_limit: usize,
    /// Longest wait for one window to drain.
    pub page_timeout: Duration,
    /// Total time allowed per relay, independent of any fan-out deadline.
    pub relay_budget: Duration,
    pub relay_config: RelayConfig,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            page_limit: 500,
            page_timeout: Duration::from_secs(15),
            relay_budget: Duration::from_secs(300),
            relay_config: RelayConfig::default(),
        }
    }
}

/// Per-relay lifecycle: `Open → (Requesting → Draining)* → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillState {
    Open,
    Requesting,
    Draining,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillStop {
    /// A window came back empty or short at the watermark, or the watermark
    /// reached zero.
    Exhausted,
    /// The relay answered above the watermark, or filled a whole window with
    /// records pinned at it, so the watermark cannot move.
    Stalled,
    ClosedByRelay(String),
    ConnectionFailed(String),
    BudgetExhausted,
}

impl BackfillStop {
    /// Whether a later run can pick up where this one left off.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::ClosedByRelay(_) | Self::ConnectionFailed(_) | Self::BudgetExhausted
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    pub relay: String,
    /// Windows requested.
    pub pages: usize,
    pub delivered: usize,
    /// Watermark the next window would have used.
    pub watermark: u64,
    pub stop: BackfillStop,
    pub states: Vec<BackfillState>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Window {
    count: usize,
    oldest: Option<u64>,
    newest: Option<u64>,
}

impl Window {
    fn record(&mut self, created_at: u64) {
        self.count += 1;
        self.oldest = Some(self.oldest.map_or(created_at, |o| o.min(created_at)));
        self.newest = Some(self.newest.map_or(created_at, |n| n.max(created_at)));
    }
}

enum PageEnd {
    Drained(Window),
    Closed(String),
    Disconnected,
    OutOfBudget,
}

pub struct BackfillEngine {
    config: BackfillConfig,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl BackfillEngine {
    pub fn new(config: BackfillConfig) -> Self {
        Self {
            config,
            store: None,
        }
    }

    /// Persist continuation watermarks so an interrupted walk resumes.
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &BackfillConfig {
        &self.config
    }

    /// Walk `target` backward from `watermark`, handing each record to `on_record`.
    ///
    /// A stored continuation watermark lower than `watermark` takes precedence.
    pub async fn backfill(
        &self,
        target: &str,
        filter: &Filter,
        watermark: u64,
        mut on_record: impl FnMut(Event),
    ) -> BackfillReport {
        let relay = normalize_targets([target])
            .into_iter()
            .next()
            .unwrap_or_default();
        let store_key = continuation_key(&relay, filter);
        let watermark = self.resume_point(&store_key, watermark);
        let budget = Instant::now() + self.config.relay_budget;

        let mut report = BackfillReport {
            relay: relay.clone(),
            pages: 0,
            delivered: 0,
            watermark,
            stop: BackfillStop::Exhausted,
            states: vec![BackfillState::Open],
        };

        let opened = timeout_at(
            budget,
            RelaySession::open(
                &relay,
                vec![self.window(filter, report.watermark)],
                self.config.relay_config.clone(),
            ),
        )
        .await;
        let mut session = match opened {
            Ok(Ok(session)) => session,
            Ok(Err(error)) => {
                warn!("backfill of {} could not connect: {}", relay, error);
                report.stop = BackfillStop::ConnectionFailed(error.to_string());
                report.states.push(BackfillState::Closed);
                return report;
            }
            Err(_) => {
                report.stop = BackfillStop::BudgetExhausted;
                report.states.push(BackfillState::Closed);
                return report;
            }
        };

        let stop = loop {
            report.pages += 1;
            report.states.push(BackfillState::Requesting);

            let page = self
                .drain_page(&mut session, filter, budget, &mut report, &mut on_record)
                .await;
            let window = match page {
                PageEnd::Drained(window) => window,
                PageEnd::Closed(reason) => break BackfillStop::ClosedByRelay(reason),
                PageEnd::Disconnected => {
                    break BackfillStop::ConnectionFailed("connection lost".to_string());
                }
                PageEnd::OutOfBudget => break BackfillStop::BudgetExhausted,
            };

            let (Some(oldest), Some(newest)) = (window.oldest, window.newest) else {
                break BackfillStop::Exhausted;
            };
            let count = window.count;
            if newest > report.watermark {
                break BackfillStop::Stalled;
            }
            if oldest == report.watermark {
                // Everything at the watermark fit in the window: nothing older is left.
                if count < self.config.page_limit.max(1) {
                    break BackfillStop::Exhausted;
                }
                break BackfillStop::Stalled;
            }
            let Some(next) = oldest.checked_sub(1) else {
                break BackfillStop::Exhausted;
            };

            report.watermark = next;
            self.save_continuation(&store_key, next);
            debug!(
                "backfill {} page {}: {} records, watermark now {}",
                relay, report.pages, count, next
            );

            if Instant::now() >= budget {
                break BackfillStop::BudgetExhausted;
            }
            if let Err(error) = session
                .resubscribe(vec![self.window(filter, next)])
                .await
            {
                break BackfillStop::ConnectionFailed(error.to_string());
            }
        };
        report.stop = stop;

        session.close().await;
        report.states.push(BackfillState::Closed);
        if !report.stop.is_resumable() {
            self.clear_continuation(&store_key);
        }
        info!(
            "backfill {} stopped ({:?}) after {} pages, {} records",
            relay, report.stop, report.pages, report.delivered
        );
        report
    }

    /// Backfill each target in turn. `on_progress(relay, index, total)` runs before each.
    pub async fn backfill_all<I, S>(
        &self,
        targets: I,
        filter: &Filter,
        watermark: u64,
        mut on_record: impl FnMut(Event),
        mut on_progress: impl FnMut(&str, usize, usize),
    ) -> Vec<BackfillReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let targets = normalize_targets(targets);
        let total = targets.len();
        let mut reports = Vec::with_capacity(total);
        for (index, relay) in targets.iter().enumerate() {
            on_progress(relay, index, total);
            reports.push(
                self.backfill(relay, filter, watermark, &mut on_record)
                    .await,
            );
        }
        reports
    }

    async fn drain_page(
        &self,
        session: &mut RelaySession,
        filter: &Filter,
        budget: Instant,
        report: &mut BackfillReport,
        on_record: &mut impl FnMut(Event),
    ) -> PageEnd {
        let page_deadline = (Instant::now() + self.config.page_timeout).min(budget);
        let mut window = Window::default();
        let mut draining = false;

        loop {
            let frame = match timeout_at(page_deadline, session.next_frame()).await {
                Ok(frame) => frame,
                // A window that never signals its end counts as drained.
                Err(_) if Instant::now() < budget => return PageEnd::Drained(window),
                Err(_) => return PageEnd::OutOfBudget,
            };
            if !draining {
                draining = true;
                report.states.push(BackfillState::Draining);
            }
            match frame {
                None => return PageEnd::Disconnected,
                Some(SubscriptionFrame::EndOfStored) => return PageEnd::Drained(window),
                Some(SubscriptionFrame::Closed(reason)) => return PageEnd::Closed(reason),
                Some(SubscriptionFrame::Event(event)) => {
                    // The window's own `until` is not checked so a relay that
                    // ignores it is detected as stalled rather than silently empty.
                    if !filter.matches(&event) {
                        debug!("{} sent event {} outside the filter", report.relay, event.id);
                        continue;
                    }
                    window.record(event.created_at);
                    report.delivered += 1;
                    on_record(event);
                }
            }
        }
    }

    fn window(&self, filter: &Filter, watermark: u64) -> Filter {
        filter
            .clone()
            .until(watermark)
            .limit(self.config.page_limit.max(1))
    }

    fn resume_point(&self, key: &str, watermark: u64) -> u64 {
        let stored = self
            .store
            .as_ref()
            .and_then(|store| store.get(key))
            .and_then(|value| value.trim().parse::<u64>().ok());
        match stored {
            Some(stored) if stored < watermark => {
                debug!("resuming backfill {} from {}", key, stored);
                stored
            }
            _ => watermark,
        }
    }

    fn save_continuation(&self, key: &str, watermark: u64) {
        if let Some(store) = &self.store {
            store.put(key, watermark.to_string());
        }
    }

    fn clear_continuation(&self, key: &str) {
        if let Some(store) = &self.store {
            store.remove(key);
        }
    }
}

impl Default for BackfillEngine {
    fn default() -> Self {
        Self::new(BackfillConfig::default())
    }
}

/// `backfill:<relay>:<fingerprint>` where the fingerprint ignores `until` and `limit`.
pub fn continuation_key(relay: &str, filter: &Filter) -> String {
    let mut shape = filter.clone();
    shape.until = None;
    shape.limit = None;
    let canonical = serde_json::to_string(&shape).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    format!("backfill:{}:{}", relay, hex::encode(&digest[..8]))
}
