//! SkyTrack server binary - REST API over the flight simulation engine.

mod api;

use anyhow::{Context, Result};
use clap::Parser;
use skytrack_core::{
    EngineConfig, LocationStore, MemoryLocationStore, SimulationEngine, SledLocationStore,
};
use skytrack_env::TokioContext;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "skytrack-server", about = "Delivery-drone tracking and flight simulation API")]
struct Args {
    /// Address to bind the HTTP API on
    #[arg(long, env = "SKYTRACK_BIND", default_value = "0.0.0.0:3000")]
    bind: SocketAddr,

    /// Data directory for the persistent location store; in-memory when omitted
    #[arg(long, env = "SKYTRACK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// API key required on mutating routes; guard disabled when omitted
    #[arg(long, env = "SKYTRACK_API_KEY")]
    api_key: Option<String>,

    /// Directory of static frontend assets to serve
    #[arg(long, env = "SKYTRACK_STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// Simulation tick period in milliseconds
    #[arg(long, env = "SKYTRACK_TICK_MS", default_value_t = 2000)]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let store: Arc<dyn LocationStore> = match &args.data_dir {
        Some(dir) => {
            info!(path = %dir.display(), "opening persistent location store");
            Arc::new(SledLocationStore::open(dir)?)
        }
        None => {
            info!("using in-memory location store");
            Arc::new(MemoryLocationStore::new())
        }
    };

    let config = EngineConfig {
        tick_period: Duration::from_millis(args.tick_ms),
        ..EngineConfig::default()
    };
    let engine = SimulationEngine::new(TokioContext::shared(), Arc::clone(&store), config);

    if args.api_key.is_none() {
        info!("no API key configured, mutating routes are unguarded");
    }

    let state = Arc::new(api::AppState::new(store, engine, args.api_key.clone()));
    let router = api::router(state, args.static_dir.clone());

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind API listener {}", args.bind))?;
    info!(address = %args.bind, "skytrack server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("api server exited with error")?;

    Ok(())
}
