mod server;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use huddle_api::{logging, AppState, Config, PresenceHub};
use huddle_sfu::{LocalEngine, SfuManager};

use server::HuddleServer;

#[derive(Parser, Debug)]
#[command(name = "huddle")]
#[command(about = "Huddle conference signaling server", long_about = None)]
struct Args {
    /// Path to a YAML/TOML config file
    #[arg(long, env = "HUDDLE_CONFIG_PATH")]
    config: Option<String>,
}

/// Resolve the configuration.
///
/// Config file search order:
/// 1. `--config` / `HUDDLE_CONFIG_PATH` (must exist)
/// 2. ./config.yaml (current working directory)
/// 3. Fall back to environment variables only
fn load_config(explicit: Option<&str>) -> Result<Config> {
    let config = match explicit {
        Some(path) => {
            if !Path::new(path).exists() {
                anyhow::bail!("Config file {path} does not exist");
            }
            eprintln!("Loading config from {path}");
            Config::from_file(path).with_context(|| format!("Failed to load {path}"))?
        }
        None if Path::new("config.yaml").exists() => {
            eprintln!("Loading config from config.yaml");
            Config::from_file("config.yaml").context("Failed to load config.yaml")?
        }
        None => {
            eprintln!("No config file found, using environment variables");
            Config::from_env().context("Failed to load config from environment")?
        }
    };

    // Fail fast on misconfigurations
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        anyhow::bail!("Configuration validation failed with {} error(s)", errors.len());
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Huddle server starting...");
    info!(
        rtc_min_port = config.engine.rtc_min_port,
        rtc_max_port = config.engine.rtc_max_port,
        "Creating media engine worker"
    );

    // 3. Media engine and session state
    let engine = LocalEngine::new(config.worker_settings())
        .context("Failed to create media engine worker")?;
    let sfu = SfuManager::new(Arc::new(engine), config.sfu_config());
    let presence = PresenceHub::new(config.presence.group.clone());

    // 4. Serve until shutdown
    let state = AppState::new(Arc::clone(&sfu), presence, config.server.clone());
    HuddleServer::new(config.http_address(), state).start().await?;

    let stats = sfu.get_stats();
    info!(
        rooms = stats.active_rooms,
        peers = stats.total_peers,
        "Huddle server stopped"
    );
    Ok(())
}
