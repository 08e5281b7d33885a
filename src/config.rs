//! Configuration management for the inferd service.
//!
//! Configuration is assembled from multiple sources:
//! 1. Default configuration (embedded in binary)
//! 2. System-wide configuration file (`/etc/inferd/config.toml`)
//! 3. User-specified configuration file
//! 4. Environment variables (prefixed with `INFERD_`)
//! 5. Command-line arguments
//!
//! Sources are loaded in order of precedence, with later sources overriding
//! earlier ones.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::backend::ChunkMode;
use crate::error::Result;

/// Command-line arguments
#[derive(Debug, Default, Parser)]
#[clap(version, about)]
pub struct Args {
    /// Configuration file path
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind the HTTP server to
    #[clap(long)]
    pub host: Option<String>,

    /// Port to bind the HTTP server to
    #[clap(long)]
    pub port: Option<u16>,

    /// Generation backend base URL
    #[clap(long)]
    pub backend_url: Option<String>,

    /// Key-value store backend (redis, memory)
    #[clap(long)]
    pub store: Option<String>,

    /// Key-value store connection URL
    #[clap(long)]
    pub store_url: Option<String>,
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,
    /// Generation backend settings
    pub backend: BackendConfig,
    /// Key-value store settings
    pub store: StoreConfig,
    /// Orchestration settings
    pub inference: InferenceConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Per-request timeout applied by the server middleware
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Generation backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the Ollama-compatible backend
    pub url: String,
    /// Chunk semantics the backend delivers when streaming
    #[serde(default = "default_chunk_mode")]
    pub chunk_mode: ChunkMode,
}

/// Key-value store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    /// In-process store, for development and tests
    Memory,
}

/// Key-value store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: String,
}

/// Orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Generation attempts before structured-output retry gives up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Default polling interval for lateral stream consumers
    #[serde(default = "default_poll_interval_ms")]
    pub lateral_poll_interval_ms: u64,
}

impl InferenceConfig {
    pub fn lateral_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lateral_poll_interval_ms)
    }
}

impl ServiceConfig {
    /// Load configuration from all sources
    pub fn load(args: &Args) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name("/etc/inferd/config.toml").required(false));

        // Load user config if specified
        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        // Add environment variables
        // Nested keys use a double underscore, e.g. INFERD_SERVER__PORT
        builder = builder.add_source(config::Environment::with_prefix("INFERD").separator("__"));

        // Build config
        let mut config: ServiceConfig = builder.build()?.try_deserialize()?;

        // Override with command line args
        if let Some(host) = &args.host {
            config.server.host = host.clone();
        }
        if let Some(port) = args.port {
            config.server.port = port;
        }
        if let Some(url) = &args.backend_url {
            config.backend.url = url.clone();
        }
        if let Some(store) = &args.store {
            config.store.backend = match store.as_str() {
                "memory" => StoreBackend::Memory,
                _ => StoreBackend::Redis,
            };
        }
        if let Some(url) = &args.store_url {
            config.store.url = url.clone();
        }

        Ok(config)
    }
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_chunk_mode() -> ChunkMode {
    ChunkMode::Delta
}

fn default_max_attempts() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    200
}
