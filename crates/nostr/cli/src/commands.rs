use anyhow::{Context, Result, bail};
use nostr::nip19::{
    self, AddressPointer, EventPointer, ProfilePointer, encode_naddr, encode_nevent, encode_note,
    encode_nprofile, encode_npub,
};
use std::path::Path;

use bytes::Bytes;
use nostr::{Event, unix_now_secs};
use nostr_blossom::{
    BlobClient, BlobDescriptor, BlobHash, HashSource, MultiServerReport, SignedAuthorization,
    hash_bytes, hash_file,
};
use nostr_client::{
    BackfillEngine, BackfillReport, BackfillStop, FanoutCoordinator, Filter, TimelineQuery,
};
use serde_json::{Value, json};
use tracing::info;

use crate::config::EngineConfig;
use crate::{Commands, EncodeCommand};

pub async fn execute(command: Commands, config: &EngineConfig) -> Result<Value> {
    match command {
        Commands::Decode { identifier } => {
            let entity = nip19::decode(&identifier)
                .with_context(|| format!("failed to decode {identifier}"))?;
            Ok(serde_json::to_value(entity)?)
        }
        Commands::Encode { entity } => {
            let encoded = encode(entity).context("failed to encode identifier")?;
            Ok(json!({ "identifier": encoded }))
        }
        Commands::Fetch { identifier } => fetch(&identifier, config).await,
        Commands::Timeline {
            authors,
            kinds,
            since,
            until,
            limit,
        } => {
            let query = TimelineQuery {
                authors,
                kinds,
                since,
                until,
                limit: Some(limit),
            };
            let coordinator = FanoutCoordinator::new(config.fanout.clone());
            let merged = coordinator.fetch_timeline(&config.relays, &query).await;
            Ok(json!({
                "events": merged.events,
                "responded": merged.responded,
                "targets": merged.targets,
                "timed_out": merged.timed_out,
            }))
        }
        Commands::Backfill {
            authors,
            kinds,
            until,
            events,
        } => backfill(authors, kinds, until, events, config).await,
        Commands::Hash { path } => {
            let hash = hash_file(&path)
                .await
                .with_context(|| format!("failed to hash {}", path.display()))?;
            Ok(json!({ "sha256": hash.hex, "length": hash.length }))
        }
        Commands::Authorize { path, pubkey, mime } => {
            authorize(&path, &pubkey, mime.as_deref(), config).await
        }
        Commands::Upload {
            path,
            auth,
            mime,
            servers,
        } => upload(&path, &auth, mime.as_deref(), servers, config).await,
    }
}

/// Write `output` to stdout as pretty JSON.
#[expect(clippy::print_stdout)]
pub fn emit(output: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(output)?);
    Ok(())
}

pub fn encode(entity: EncodeCommand) -> nip19::Result<String> {
    match entity {
        EncodeCommand::Note { id } => encode_note(&id),
        EncodeCommand::Npub { pubkey } => encode_npub(&pubkey),
        EncodeCommand::Nevent {
            id,
            relays,
            author,
            kind,
        } => encode_nevent(&EventPointer {
            id,
            relays,
            author,
            kind,
        }),
        EncodeCommand::Nprofile { pubkey, relays } => {
            encode_nprofile(&ProfilePointer { pubkey, relays })
        }
        EncodeCommand::Naddr {
            kind,
            author,
            identifier,
            relays,
        } => encode_naddr(&AddressPointer {
            identifier,
            author,
            kind,
            relays,
        }),
    }
}

async fn fetch(identifier: &str, config: &EngineConfig) -> Result<Value> {
    let entity =
        nip19::decode(identifier).with_context(|| format!("failed to decode {identifier}"))?;
    let coordinator = FanoutCoordinator::new(config.fanout.clone());
    let Some(event) = coordinator.resolve_entity(&entity, &config.relays).await else {
        bail!(
            "{} not found on {} relay(s)",
            entity.primary_id,
            config.relays.len() + entity.relay_hints.len()
        );
    };
    Ok(json!({ "entity": entity, "event": event }))
}

async fn backfill(
    authors: Vec<String>,
    kinds: Vec<u16>,
    until: Option<u64>,
    include_events: bool,
    config: &EngineConfig,
) -> Result<Value> {
    let watermark = match until {
        Some(until) => until,
        None => unix_now_secs().context("system clock is before the unix epoch")?,
    };
    let mut filter = Filter::new().authors(authors);
    if !kinds.is_empty() {
        filter = filter.kinds(kinds);
    }

    let engine = BackfillEngine::new(config.backfill.clone());
    let mut collected: Vec<Event> = Vec::new();
    let reports = engine
        .backfill_all(
            &config.relays,
            &filter,
            watermark,
            |event| {
                if include_events {
                    collected.push(event);
                }
            },
            |relay, index, total| info!("backfilling {} ({}/{})", relay, index + 1, total),
        )
        .await;

    let reports: Vec<Value> = reports.iter().map(report_json).collect();
    let mut output = json!({ "reports": reports });
    if include_events {
        output["events"] = serde_json::to_value(collected)?;
    }
    Ok(output)
}

async fn authorize(
    path: &Path,
    pubkey: &str,
    mime: Option<&str>,
    config: &EngineConfig,
) -> Result<Value> {
    let hash = hash_file(path)
        .await
        .with_context(|| format!("failed to hash {}", path.display()))?;
    let client = BlobClient::new(config.blob.clone())?;
    let now = unix_now_secs().context("system clock is before the unix epoch")?;
    let mut request = client.upload_authorization(&hash, mime, now);
    if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
        request = request.name(name);
    }
    let unsigned = request.to_unsigned(pubkey, now);
    let id = unsigned.compute_id()?;
    Ok(json!({ "id": id, "event": unsigned, "servers": config.blossom_servers }))
}

async fn upload(
    path: &Path,
    auth_path: &Path,
    mime: Option<&str>,
    servers: Vec<String>,
    config: &EngineConfig,
) -> Result<Value> {
    let servers = if servers.is_empty() {
        config.blossom_servers.clone()
    } else {
        servers
    };
    if servers.is_empty() {
        bail!("no blob servers: pass --server or set NOSTR_ENGINE_BLOSSOM_SERVERS");
    }

    let auth_json = tokio::fs::read_to_string(auth_path)
        .await
        .with_context(|| format!("failed to read {}", auth_path.display()))?;
    let event: Event = serde_json::from_str(&auth_json)
        .with_context(|| format!("{} is not an event", auth_path.display()))?;
    let auth = SignedAuthorization::new(event)?;

    let body = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let hash = hash_bytes(&body);
    if !auth.covers(&hash.hex) {
        bail!("authorization does not cover sha256 {}", hash.hex);
    }
    let now = unix_now_secs().context("system clock is before the unix epoch")?;
    if auth.is_expired(now) {
        bail!("authorization expired");
    }

    let client = BlobClient::new(config.blob.clone())?;
    let report = client
        .upload_to_servers(Bytes::from(body), &auth, &servers, mime)
        .await?;
    Ok(upload_json(&hash, &report, mime))
}

fn upload_json(hash: &BlobHash, report: &MultiServerReport, mime: Option<&str>) -> Value {
    let descriptor = BlobDescriptor::from_upload(hash, &report.primary, mime);
    let failed: Vec<Value> = report
        .failed
        .iter()
        .map(|(server, reason)| json!({ "server": server, "reason": reason }))
        .collect();
    json!({
        "sha256": descriptor.content_hash,
        "length": descriptor.byte_length,
        "mime_type": descriptor.mime_type,
        "url": descriptor.canonical_url,
        "server_sha256": descriptor.server_reported_hash,
        "hash_source": hash_source_label(descriptor.hash_source),
        "server_hash_diverges": descriptor.server_hash_diverges(),
        "urls": report.urls(),
        "failed": failed,
    })
}

fn hash_source_label(source: HashSource) -> &'static str {
    match source {
        HashSource::ServerDeclared => "server",
        HashSource::UrlHeuristic => "url",
        HashSource::Unknown => "unknown",
    }
}

fn report_json(report: &BackfillReport) -> Value {
    json!({
        "relay": report.relay,
        "pages": report.pages,
        "delivered": report.delivered,
        "watermark": report.watermark,
        "stop": stop_label(&report.stop),
        "resumable": report.stop.is_resumable(),
    })
}

fn stop_label(stop: &BackfillStop) -> String {
    match stop {
        BackfillStop::Exhausted => "exhausted".to_string(),
        BackfillStop::Stalled => "stalled".to_string(),
        BackfillStop::ClosedByRelay(reason) => format!("closed by relay: {reason}"),
        BackfillStop::ConnectionFailed(reason) => format!("connection failed: {reason}"),
        BackfillStop::BudgetExhausted => "budget exhausted".to_string(),
    }
}
