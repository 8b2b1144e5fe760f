use clap::Parser;
use nostr_engine_cli::{Cli, EngineConfig, init_tracing, run};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;
    run(cli, config).await
}
