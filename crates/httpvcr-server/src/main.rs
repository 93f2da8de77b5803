// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use httpvcr_archive::{Archive, PolicyRequirement};
use httpvcr_server::{
    build_playback_router, load_playback_startup_config, serve_playback, PlaybackDispatcher,
    Scenario, ServiceEndpoint,
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "httpvcr-server", version, about = "httpvcr playback server")]
struct ServerCliArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    bind: Option<String>,
    /// Archive directory holding vcr.json and stub files.
    #[arg(long)]
    archive: Option<PathBuf>,
    /// JSON file listing endpoint descriptors to serve.
    #[arg(long)]
    endpoints: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    print_effective_config: bool,
    #[arg(long, default_value_t = false)]
    validate_config: bool,
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if env_bool("VCR_LOG_JSON", false) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn load_endpoints(path: &std::path::Path) -> Result<Vec<ServiceEndpoint>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| format!("failed reading endpoints file {}: {err}", path.display()))?;
    serde_json::from_str(&text)
        .map_err(|err| format!("invalid endpoints file {}: {err}", path.display()))
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = ServerCliArgs::parse();
    init_tracing();

    let startup = load_playback_startup_config(
        cli.config.as_deref(),
        cli.bind.as_deref(),
        cli.archive.as_deref(),
        cli.endpoints.as_deref(),
    )?;

    if cli.validate_config {
        info!("configuration validated");
        return Ok(());
    }
    if cli.print_effective_config {
        println!(
            "{}",
            serde_json::to_string_pretty(&startup)
                .map_err(|err| format!("render effective config: {err}"))?
        );
        return Ok(());
    }

    let endpoints = match &startup.endpoints_file {
        Some(path) => load_endpoints(path)?,
        None => Vec::new(),
    };
    if endpoints.is_empty() {
        return Err(
            "no endpoints registered; pass --endpoints or set VCR_ENDPOINTS_FILE".to_string(),
        );
    }

    // Archive problems must stop the process before it serves anything.
    let archive = Archive::open(&startup.archive_root, PolicyRequirement::Required)
        .map_err(|err| err.to_string())?;
    info!(
        archive = %startup.archive_root.display(),
        endpoints = endpoints.len(),
        "archive opened"
    );

    let dispatcher = Arc::new(PlaybackDispatcher::new(
        Arc::new(archive),
        &endpoints,
        Arc::new(Scenario::new()),
    ));
    let router = build_playback_router(dispatcher);

    let listener = TcpListener::bind(&startup.bind_addr)
        .await
        .map_err(|err| format!("bind {}: {err}", startup.bind_addr))?;
    serve_playback(listener, router).await
}
