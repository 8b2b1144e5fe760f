//! Relay client for the Nostr engine.
//!
//! - `relay`: one WebSocket connection multiplexing subscriptions
//! - `session`: a single bounded request/response exchange against one relay
//! - `fanout`: the same query against many relays, merged by policy
//! - `backfill`: backward pagination of one relay's history by watermark
//! - `cache`: bounded LRU of fetched events

pub mod backfill;
pub mod cache;
pub mod error;
pub mod fanout;
pub mod filter;
pub mod relay;
pub mod session;
pub mod subscription;

pub use nostr::store;

pub use backfill::{
    BackfillConfig, BackfillEngine, BackfillReport, BackfillState, BackfillStop,
    continuation_key,
};
pub use cache::{CacheKey, DEFAULT_CACHE_CAPACITY, EventCache};
pub use error::{ClientError, Result};
pub use fanout::{
    FanoutConfig, FanoutCoordinator, MergePolicy, MergedResult, TimelineQuery, normalize_targets,
    relay_list_urls,
};
pub use filter::{Filter, any_filter_matches};
pub use relay::{ConnectionState, PublishConfirmation, RelayConfig, RelayConnection, RelayMessage};
pub use session::{RelaySession, SessionEnd, SessionOutcome, fetch, fetch_until};
pub use subscription::{Subscription, SubscriptionFrame, SubscriptionId};
