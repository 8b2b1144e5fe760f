//! Subscription bookkeeping and correlation tokens.

use crate::error::{ClientError, Result};
use crate::filter::Filter;
use nostr::Event;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Default per-subscription frame buffer.
pub const DEFAULT_FRAME_BUFFER: usize = 1024;

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Correlation token matching inbound frames to the REQ that caused them.
///
/// Tokens come from a process-wide counter and are never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn next() -> Self {
        Self::with_prefix("sub")
    }

    pub fn with_prefix(prefix: &str) -> Self {
        let sequence = NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed);
        Self(format!("{prefix}-{sequence}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Frames routed to a single subscription, in the order the relay sent them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionFrame {
    Event(Event),
    EndOfStored,
    Closed(String),
}

/// A registered subscription: its token, filters, and the channel its frames go to.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub filters: Vec<Filter>,
    frames: mpsc::Sender<SubscriptionFrame>,
}

impl Subscription {
    /// Create a subscription that delivers frames on a bounded channel.
    pub fn with_channel(
        id: SubscriptionId,
        filters: Vec<Filter>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<SubscriptionFrame>) {
        let (frames, rx) = mpsc::channel(buffer.max(1));
        (Self { id, filters, frames }, rx)
    }

    /// Forward a frame, waiting for buffer space. Fails once the receiver is gone.
    pub async fn deliver(&self, frame: SubscriptionFrame) -> Result<()> {
        self.frames
            .send(frame)
            .await
            .map_err(|_| ClientError::Subscription(format!("{} receiver dropped", self.id)))
    }

    /// True once the consumer has dropped its receiver.
    pub fn is_abandoned(&self) -> bool {
        self.frames.is_closed()
    }

    /// `["REQ", <token>, <filter>...]`
    pub fn request_frame(&self) -> Result<serde_json::Value> {
        let mut frame = vec![
            serde_json::Value::from("REQ"),
            serde_json::Value::from(self.id.as_str()),
        ];
        for filter in &self.filters {
            frame.push(filter.to_value()?);
        }
        Ok(serde_json::Value::Array(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tokens_are_never_reused() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(SubscriptionId::next()));
        }
    }

    #[test]
    fn request_frame_inlines_filters() -> Result<()> {
        let id = SubscriptionId::with_prefix("lookup");
        let (subscription, _rx) = Subscription::with_channel(
            id.clone(),
            vec![Filter::new().ids(["abc"]), Filter::new().kinds([0])],
            4,
        );
        assert_eq!(
            subscription.request_frame()?,
            json!(["REQ", id.as_str(), {"ids": ["abc"]}, {"kinds": [0]}])
        );
        Ok(())
    }

    #[tokio::test]
    async fn delivery_fails_after_receiver_drop() {
        let (subscription, rx) = Subscription::with_channel(SubscriptionId::next(), vec![], 1);
        assert!(!subscription.is_abandoned());
        drop(rx);
        assert!(subscription.is_abandoned());
        assert!(
            subscription
                .deliver(SubscriptionFrame::EndOfStored)
                .await
                .is_err()
        );
    }
}
