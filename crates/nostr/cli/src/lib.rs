//! `nostr-engine`: decode identifiers, query relays, backfill history, hash
//! and upload blobs from the command line. Every command prints one JSON
//! document.

pub mod commands;
pub mod config;

use clap::{Parser, Subcommand};

pub use config::{ConfigError, DEFAULT_RELAYS, EngineConfig};

#[derive(Parser, Debug)]
#[command(name = "nostr-engine", version, about = "Nostr relay and blob engine")]
pub struct Cli {
    /// Relay URL to query; repeat to add more. Overrides NOSTR_ENGINE_RELAYS.
    #[arg(long = "relay", global = true)]
    pub relays: Vec<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decode a bech32 identifier (note, npub, nevent, nprofile, naddr).
    Decode {
        /// Identifier, with or without the `nostr:` prefix.
        identifier: String,
    },
    /// Encode hex values into a bech32 identifier.
    Encode {
        #[command(subcommand)]
        entity: EncodeCommand,
    },
    /// Resolve an identifier through its relay hints and the configured relays.
    Fetch { identifier: String },
    /// Merged, newest-first feed from every relay.
    Timeline {
        #[arg(long = "author", required = true)]
        authors: Vec<String>,
        #[arg(long = "kind")]
        kinds: Vec<u16>,
        #[arg(long)]
        since: Option<u64>,
        #[arg(long)]
        until: Option<u64>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Page backward through each relay's history.
    Backfill {
        #[arg(long = "author", required = true)]
        authors: Vec<String>,
        #[arg(long = "kind")]
        kinds: Vec<u16>,
        /// Starting watermark; defaults to now.
        #[arg(long)]
        until: Option<u64>,
        /// Print the events themselves, not only the per-relay reports.
        #[arg(long)]
        events: bool,
    },
    /// SHA-256 of a file, streamed.
    Hash { path: std::path::PathBuf },
    /// Print the unsigned upload authorization for a file, for an external signer.
    Authorize {
        path: std::path::PathBuf,
        /// Hex public key of the signer.
        #[arg(long)]
        pubkey: String,
        #[arg(long)]
        mime: Option<String>,
    },
    /// Upload a file with a signed authorization, mirroring it to every server.
    Upload {
        path: std::path::PathBuf,
        /// File holding the signed kind 24242 event as JSON.
        #[arg(long)]
        auth: std::path::PathBuf,
        #[arg(long)]
        mime: Option<String>,
        /// Blob server base URL; repeat to add more. Overrides NOSTR_ENGINE_BLOSSOM_SERVERS.
        #[arg(long = "server")]
        servers: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum EncodeCommand {
    Note {
        id: String,
    },
    Npub {
        pubkey: String,
    },
    Nevent {
        id: String,
        #[arg(long = "relay-hint")]
        relays: Vec<String>,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        kind: Option<u32>,
    },
    Nprofile {
        pubkey: String,
        #[arg(long = "relay-hint")]
        relays: Vec<String>,
    },
    Naddr {
        #[arg(long)]
        kind: u32,
        #[arg(long)]
        author: String,
        /// `d` tag value; may be empty.
        #[arg(long, default_value = "")]
        identifier: String,
        #[arg(long = "relay-hint")]
        relays: Vec<String>,
    },
}

/// Install the stderr log subscriber (`RUST_LOG`, default `info`).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

pub async fn run(cli: Cli, mut config: EngineConfig) -> anyhow::Result<()> {
    if !cli.relays.is_empty() {
        config.relays = nostr_client::normalize_targets(&cli.relays);
    }
    let output = commands::execute(cli.command, &config).await?;
    commands::emit(&output)
}
