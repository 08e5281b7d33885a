//! Generation backend abstraction.
//!
//! The orchestrator talks to a single "generate" endpoint through the
//! [`GenerationBackend`] trait: one prompt plus sampling options in, either a
//! single response object or a stream of partial chunks out. Streamed chunks
//! are normalized so that `response` always carries the full text generated
//! so far, regardless of whether the backend delivers deltas.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::api::openai_compat::ListModelsResponse;
use crate::error::Result;

pub mod ollama;

pub use ollama::{ChunkMode, OllamaBackend};

/// Sampling options forwarded to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub num_ctx: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            top_p: 0.9,
            top_k: 40,
            num_ctx: 4096,
            stop: Vec::new(),
        }
    }
}

/// One generation call: a fully rendered prompt plus options.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub options: GenerateOptions,
}

/// One normalized backend chunk. `response` is cumulative: it replaces, never
/// extends, the previous chunk's text. The terminal chunk carries the usage
/// counters.
#[derive(Debug, Clone, Default)]
pub struct GenerateChunk {
    pub created_at: String,
    pub response: String,
    pub done: bool,
    pub eval_count: Option<u64>,
    pub prompt_eval_count: Option<u64>,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<GenerateChunk>> + Send>>;

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Single-shot generation; the returned chunk is terminal.
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateChunk>;

    /// Streaming generation. The stream ends after the terminal chunk.
    async fn generate_stream(&self, req: &GenerateRequest) -> Result<ChunkStream>;

    /// The backend's model catalog, passed through unchanged.
    async fn list_models(&self) -> Result<ListModelsResponse>;
}
