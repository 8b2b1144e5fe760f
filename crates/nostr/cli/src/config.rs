//! Engine settings read from `NOSTR_ENGINE_*` environment keys.

use std::env;
use std::time::Duration;

use nostr_blossom::BlobClientConfig;
use nostr_client::{BackfillConfig, FanoutConfig, RelayConfig, normalize_targets};
use thiserror::Error;

pub const DEFAULT_RELAYS: [&str; 2] = ["wss://relay.damus.io", "wss://nos.lol"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {key}: {message}")]
    InvalidNumber { key: &'static str, message: String },
    #[error("invalid NOSTR_ENGINE_RELAYS entry: {0}")]
    InvalidRelay(String),
    #[error("invalid NOSTR_ENGINE_BLOSSOM_SERVERS entry: {0}")]
    InvalidBlobServer(String),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub relays: Vec<String>,
    pub blossom_servers: Vec<String>,
    pub fanout: FanoutConfig,
    pub backfill: BackfillConfig,
    pub blob: BlobClientConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relays: DEFAULT_RELAYS.iter().map(ToString::to_string).collect(),
            blossom_servers: Vec::new(),
            fanout: FanoutConfig::default(),
            backfill: BackfillConfig::default(),
            blob: BlobClientConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or blank keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();

        if let Some(value) = read("NOSTR_ENGINE_RELAYS") {
            config.relays = parse_list(&value, &["ws", "wss"]).map_err(ConfigError::InvalidRelay)?;
        }
        if let Some(value) = read("NOSTR_ENGINE_BLOSSOM_SERVERS") {
            config.blossom_servers =
                parse_list(&value, &["http", "https"]).map_err(ConfigError::InvalidBlobServer)?;
        }

        let connect_timeout = millis(
            &read,
            "NOSTR_ENGINE_CONNECT_TIMEOUT_MS",
            config.fanout.relay_config.connect_timeout,
            500..=60_000,
        )?;
        let relay_config = RelayConfig {
            connect_timeout,
            ..config.fanout.relay_config.clone()
        };
        config.fanout.relay_config = relay_config.clone();
        config.backfill.relay_config = relay_config;

        config.fanout.lookup_timeout = millis(
            &read,
            "NOSTR_ENGINE_LOOKUP_TIMEOUT_MS",
            config.fanout.lookup_timeout,
            3_000..=8_000,
        )?;
        config.fanout.timeline_timeout = millis(
            &read,
            "NOSTR_ENGINE_TIMELINE_TIMEOUT_MS",
            config.fanout.timeline_timeout,
            1_000..=60_000,
        )?;
        config.fanout.max_concurrent_relays = number(
            &read,
            "NOSTR_ENGINE_MAX_CONCURRENT_RELAYS",
            config.fanout.max_concurrent_relays as u64,
            1..=64,
        )? as usize;

        config.backfill.page_limit = number(
            &read,
            "NOSTR_ENGINE_BACKFILL_PAGE_LIMIT",
            config.backfill.page_limit as u64,
            1..=5_000,
        )? as usize;
        config.backfill.page_timeout = millis(
            &read,
            "NOSTR_ENGINE_BACKFILL_PAGE_TIMEOUT_MS",
            config.backfill.page_timeout,
            1_000..=120_000,
        )?;
        config.backfill.relay_budget = Duration::from_secs(number(
            &read,
            "NOSTR_ENGINE_BACKFILL_RELAY_BUDGET_SECS",
            config.backfill.relay_budget.as_secs(),
            10..=3_600,
        )?);

        config.blob.request_timeout = millis(
            &read,
            "NOSTR_ENGINE_BLOB_TIMEOUT_MS",
            config.blob.request_timeout,
            1_000..=600_000,
        )?;
        config.blob.auth_expiry = Duration::from_secs(number(
            &read,
            "NOSTR_ENGINE_BLOB_AUTH_EXPIRY_SECS",
            config.blob.auth_expiry.as_secs(),
            30..=86_400,
        )?);

        Ok(config)
    }
}

fn number<F>(
    read: &F,
    key: &'static str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = read(key) else {
        return Ok(default);
    };
    let parsed = value
        .parse::<u64>()
        .map_err(|error| ConfigError::InvalidNumber {
            key,
            message: format!("{value}: {error}"),
        })?;
    Ok(parsed.clamp(*range.start(), *range.end()))
}

fn millis<F>(
    read: &F,
    key: &'static str,
    default: Duration,
    range: std::ops::RangeInclusive<u64>,
) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    number(read, key, default, range).map(Duration::from_millis)
}

fn parse_list(value: &str, schemes: &[&str]) -> Result<Vec<String>, String> {
    let entries: Vec<&str> = value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .collect();
    for entry in &entries {
        let scheme = entry.split("://").next().unwrap_or_default();
        if !entry.contains("://") || !schemes.contains(&scheme) {
            return Err((*entry).to_string());
        }
    }
    Ok(normalize_targets(entries))
}
