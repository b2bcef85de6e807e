//! Realm - A persistent multi-world voxel server
//!
//! Usage: `realm [config.toml]`. Without an argument the config is read from
//! the platform config directory.

mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use realm_core::SystemClock;
use realm_engine::{Engine, EngineConfig};
use realm_store::FileStore;
use realm_stream::ChannelTransport;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;

    info!("Starting Realm v{}", env!("CARGO_PKG_VERSION"));

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load_from(&PathBuf::from(path)),
        None => EngineConfig::load(),
    };
    config.validate()?;

    let store = Arc::new(FileStore::new(config.data_dir()).context("Failed to open world store")?);
    let transport = Arc::new(ChannelTransport::new());
    let engine = Arc::new(Engine::new(
        &config,
        store,
        transport.clone(),
        Arc::new(SystemClock),
    )?);

    let token = CancellationToken::new();
    let scheduler = engine
        .manager()
        .spawn_scheduler(config.tick_interval(), token.clone());
    let streamer = engine.run_stream_loop(config.stream_interval(), token.clone());

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("Listening on {}", config.listen_addr);

    tokio::select! {
        result = server::accept_loop(listener, engine.clone(), transport, token.clone()) => {
            if let Err(e) = result {
                error!("Listener failed: {:#}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }

    token.cancel();
    let _ = scheduler.await;
    let _ = streamer.await;

    match tokio::task::spawn_blocking(move || engine.shutdown()).await? {
        Ok(saved) => {
            info!("Saved {} worlds, goodbye", saved);
            Ok(())
        }
        Err(e) => {
            error!("Final save incomplete: {}", e);
            Err(e.into())
        }
    }
}
