use anyhow::Result;
use clap::Parser;
use fleet_core::{api::ApiServer, config::Config, orchestrator::Orchestrator};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleet-core", about = "Coordination substrate for agent fleets")]
struct Args {
    /// Override the API listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the API listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut config = Config::load()?;
    if let Some(host) = args.host {
        config.api.host = host;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }

    info!("Starting Fleet Core");

    std::fs::create_dir_all(&config.core.data_root)?;
    if config.core.embeddings_enabled {
        tracing::warn!(
            "FLEET_EMBEDDINGS_ENABLED is set but no embedding backend is wired in; \
             context retrieval runs keyword-only"
        );
    }

    let orchestrator = Arc::new(Orchestrator::new(config.core.clone()));
    let api_server = ApiServer::new(config, orchestrator.clone());

    tokio::select! {
        result = orchestrator.run() => {
            if let Err(e) = result {
                tracing::error!("orchestrator failed: {e}");
            }
        }
        result = api_server.run() => {
            if let Err(e) = result {
                tracing::error!("API server failed: {e}");
            }
        }
    }

    Ok(())
}
