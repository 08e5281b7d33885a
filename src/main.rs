use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inferd::backend::{GenerationBackend, OllamaBackend};
use inferd::config::{Args, ServiceConfig, StoreBackend};
use inferd::orchestrator::{Orchestrator, RetryPolicy};
use inferd::server::{self, state::ServerState};
use inferd::store::{KvStore, MemoryStore, RedisStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let args = Args::parse();
    let config = ServiceConfig::load(&args)?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;

    // Construct the collaborators explicitly; the orchestrator and stores
    // receive their clients, never look them up from ambient state.
    let backend: Arc<dyn GenerationBackend> = Arc::new(OllamaBackend::new(
        config.backend.url.clone(),
        config.backend.chunk_mode,
    ));

    let kv: Arc<dyn KvStore> = match config.store.backend {
        StoreBackend::Redis => Arc::new(RedisStore::connect(&config.store.url).await?),
        StoreBackend::Memory => {
            info!("Using in-process memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(
        backend,
        kv,
        RetryPolicy {
            max_attempts: config.inference.max_attempts,
        },
    ));

    let state = ServerState::new(orchestrator, Arc::new(config));
    server::start_server(addr, state).await?;

    Ok(())
}
