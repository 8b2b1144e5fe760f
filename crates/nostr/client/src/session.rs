//! One request/response exchange against one relay.
//!
//! A [`RelaySession`] owns its connection end to end: it opens the socket,
//! sends a single `REQ`, yields frames in relay order and closes on every
//! exit path. [`fetch`] wraps that lifecycle with a hard deadline.

use crate::error::Result;
use crate::filter::{Filter, any_filter_matches};
use crate::relay::{RelayConfig, RelayConnection};
use crate::subscription::{Subscription, SubscriptionFrame, SubscriptionId};
use nostr::Event;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

/// Why a session stopped producing frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    EndOfStored,
    ClosedByRelay(String),
    Deadline,
    Disconnected,
    ConnectFailed(String),
    Cancelled,
}

impl SessionEnd {
    /// The relay answered the request, even if with nothing.
    pub fn relay_answered(&self) -> bool {
        matches!(self, Self::EndOfStored | Self::ClosedByRelay(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub relay: String,
    pub delivered: usize,
    pub end: SessionEnd,
}

pub struct RelaySession {
    connection: RelayConnection,
    subscription_id: SubscriptionId,
    frames: mpsc::Receiver<SubscriptionFrame>,
    closed: bool,
}

impl RelaySession {
    /// Connect to `url` and send one `REQ` carrying `filters`.
    pub async fn open(url: &str, filters: Vec<Filter>, config: RelayConfig) -> Result<Self> {
        let connection = RelayConnection::with_config(url, config)?;
        connection.connect().await?;

        let (subscription_id, frames) = match subscribe(&connection, filters).await {
            Ok(subscribed) => subscribed,
            Err(error) => {
                connection.disconnect().await;
                return Err(error);
            }
        };

        debug!("opened {} on {}", subscription_id, connection.url());
        Ok(Self {
            connection,
            subscription_id,
            frames,
            closed: false,
        })
    }

    pub fn relay_url(&self) -> &str {
        self.connection.url()
    }

    pub fn subscription_id(&self) -> &SubscriptionId {
        &self.subscription_id
    }

    /// Next frame for the current request, `None` once the connection is gone.
    pub async fn next_frame(&mut self) -> Option<SubscriptionFrame> {
        if self.closed {
            return None;
        }
        self.frames.recv().await
    }

    /// Close the current request and issue a new one on the same connection.
    ///
    /// The new request gets a fresh correlation token; stragglers for the
    /// old token are dropped by the connection.
    pub async fn resubscribe(&mut self, filters: Vec<Filter>) -> Result<()> {
        if let Err(error) = self
            .connection
            .unsubscribe(self.subscription_id.as_str())
            .await
        {
            debug!("CLOSE for {} failed: {}", self.subscription_id, error);
        }
        let (subscription_id, frames) = subscribe(&self.connection, filters).await?;
        self.subscription_id = subscription_id;
        self.frames = frames;
        Ok(())
    }

    /// Send `CLOSE` and release the socket. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let close_timeout = self.connection.config().close_timeout;
        let unsubscribe = self.connection.unsubscribe(self.subscription_id.as_str());
        match tokio::time::timeout(close_timeout, unsubscribe).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => debug!("CLOSE for {} failed: {}", self.subscription_id, error),
            Err(_) => debug!("CLOSE for {} timed out", self.subscription_id),
        }
        self.connection.disconnect().await;
        self.frames.close();
    }
}

async fn subscribe(
    connection: &RelayConnection,
    filters: Vec<Filter>,
) -> Result<(SubscriptionId, mpsc::Receiver<SubscriptionFrame>)> {
    let id = SubscriptionId::next();
    let (subscription, frames) =
        Subscription::with_channel(id.clone(), filters, connection.config().frame_buffer);
    connection.subscribe(subscription).await?;
    Ok((id, frames))
}

/// Run one request against `url` until end of stored events or `deadline`.
///
/// `on_event` sees each event matching `filters`, in relay order. Every
/// failure is reported through [`SessionEnd`]; nothing here returns an error.
pub async fn fetch(
    url: &str,
    filters: Vec<Filter>,
    config: &RelayConfig,
    deadline: Instant,
    on_event: impl FnMut(Event),
) -> SessionOutcome {
    fetch_until(
        url,
        filters,
        config,
        deadline,
        std::future::pending(),
        on_event,
    )
    .await
}

/// Like [`fetch`], additionally stopping as soon as `cancel` resolves.
pub async fn fetch_until<C>(
    url: &str,
    filters: Vec<Filter>,
    config: &RelayConfig,
    deadline: Instant,
    cancel: C,
    mut on_event: impl FnMut(Event),
) -> SessionOutcome
where
    C: Future<Output = ()>,
{
    tokio::pin!(cancel);
    let outcome = |delivered, end| SessionOutcome {
        relay: url.to_string(),
        delivered,
        end,
    };

    let opened = tokio::select! {
        biased;
        () = &mut cancel => return outcome(0, SessionEnd::Cancelled),
        opened = timeout_at(deadline, RelaySession::open(url, filters.clone(), config.clone())) => opened,
    };
    let mut session = match opened {
        Ok(Ok(session)) => session,
        Ok(Err(error)) => {
            warn!("relay {} unavailable: {}", url, error);
            return outcome(0, SessionEnd::ConnectFailed(error.to_string()));
        }
        Err(_) => {
            debug!("deadline elapsed while connecting to {}", url);
            return outcome(0, SessionEnd::Deadline);
        }
    };

    let mut delivered = 0;
    let end = loop {
        let frame = tokio::select! {
            biased;
            () = &mut cancel => break SessionEnd::Cancelled,
            frame = timeout_at(deadline, session.next_frame()) => frame,
        };
        match frame {
            Err(_) => break SessionEnd::Deadline,
            Ok(None) => break SessionEnd::Disconnected,
            Ok(Some(SubscriptionFrame::EndOfStored)) => break SessionEnd::EndOfStored,
            Ok(Some(SubscriptionFrame::Closed(reason))) => break SessionEnd::ClosedByRelay(reason),
            Ok(Some(SubscriptionFrame::Event(event))) => {
                if any_filter_matches(&filters, &event) {
                    delivered += 1;
                    on_event(event);
                } else {
                    debug!("{} sent event {} outside the filter", url, event.id);
                }
            }
        }
    };

    session.close().await;
    outcome(delivered, end)
}
