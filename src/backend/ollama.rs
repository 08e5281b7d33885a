//! Ollama client for the `/api/generate` endpoint.
//!
//! Sends raw prompts and consumes either a single JSON object or a
//! newline-delimited stream of partial objects. Responses that fail schema
//! validation surface as `BackendContract` errors; non-success statuses carry
//! the backend's `error` field.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::openai_compat::ListModelsResponse;
use crate::error::{Error, Result};

use super::{ChunkStream, GenerateChunk, GenerateOptions, GenerateRequest, GenerationBackend};

/// Whether streamed chunks carry deltas or the full response-so-far.
///
/// Ollama itself streams deltas; some intermediaries re-deliver the
/// cumulative text on every chunk. The client normalizes both shapes to
/// cumulative before anything downstream sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMode {
    Delta,
    Cumulative,
}

pub struct OllamaBackend {
    http: reqwest::Client,
    base_url: String,
    chunk_mode: ChunkMode,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, chunk_mode: ChunkMode) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            chunk_mode,
        }
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url.trim_end_matches('/'))
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<WireError>(&body)
            .map(|e| e.error)
            .unwrap_or(body);
        Err(Error::BackendRejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateChunk> {
        let response = self
            .http
            .post(self.generate_url())
            .json(&WireRequest::new(req, false))
            .send()
            .await?;
        let body = Self::check_status(response).await?.text().await?;

        let wire: WireResponse = serde_json::from_str(&body)
            .map_err(|e| Error::BackendContract(e.to_string()))?;
        let mut normalizer = ChunkNormalizer::new(self.chunk_mode);
        Ok(wire.into_chunk(&mut normalizer))
    }

    async fn generate_stream(&self, req: &GenerateRequest) -> Result<ChunkStream> {
        debug!(model = %req.model, "Opening generation stream");
        let response = self
            .http
            .post(self.generate_url())
            .json(&WireRequest::new(req, true))
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let mut normalizer = ChunkNormalizer::new(self.chunk_mode);
        let mut body = response.bytes_stream();

        let stream = async_stream::try_stream! {
            let mut buffer: Vec<u8> = Vec::new();
            'recv: while let Some(piece) = body.next().await {
                let piece = piece?;
                buffer.extend_from_slice(&piece);

                while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = std::str::from_utf8(&line)
                        .map_err(|e| Error::BackendContract(e.to_string()))?
                        .trim();
                    if line.is_empty() {
                        continue;
                    }

                    let wire: WireResponse = serde_json::from_str(line)
                        .map_err(|e| Error::BackendContract(e.to_string()))?;
                    let chunk = wire.into_chunk(&mut normalizer);
                    let done = chunk.done;
                    yield chunk;
                    if done {
                        break 'recv;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn list_models(&self) -> Result<ListModelsResponse> {
        let response = self.http.get(self.tags_url()).send().await?;
        let body = Self::check_status(response).await?.text().await?;
        serde_json::from_str(&body).map_err(|e| Error::BackendContract(e.to_string()))
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    raw: bool,
    stream: bool,
    options: &'a GenerateOptions,
}

impl<'a> WireRequest<'a> {
    fn new(req: &'a GenerateRequest, stream: bool) -> Self {
        Self {
            model: &req.model,
            prompt: &req.prompt,
            raw: true,
            stream,
            options: &req.options,
        }
    }
}

/// Schema of one backend response object. Missing required fields fail
/// deserialization and surface as a contract violation.
#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    #[allow(dead_code)]
    model: String,
    created_at: String,
    response: String,
    done: bool,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

impl WireResponse {
    fn into_chunk(self, normalizer: &mut ChunkNormalizer) -> GenerateChunk {
        GenerateChunk {
            created_at: self.created_at,
            response: normalizer.apply(&self.response),
            done: self.done,
            eval_count: self.eval_count,
            prompt_eval_count: self.prompt_eval_count,
        }
    }
}

#[derive(Deserialize)]
struct WireError {
    error: String,
}

/// Turns raw chunk text into the cumulative response-so-far, and scrubs the
/// stray leading colon some models emit at the start of a generation.
struct ChunkNormalizer {
    mode: ChunkMode,
    accumulated: String,
}

impl ChunkNormalizer {
    fn new(mode: ChunkMode) -> Self {
        Self {
            mode,
            accumulated: String::new(),
        }
    }

    fn apply(&mut self, raw: &str) -> String {
        match self.mode {
            ChunkMode::Delta => {
                let delta = if self.accumulated.is_empty() {
                    Self::scrub_head(raw)
                } else {
                    raw
                };
                self.accumulated.push_str(delta);
                self.accumulated.clone()
            }
            ChunkMode::Cumulative => {
                self.accumulated = Self::scrub_head(raw).to_owned();
                self.accumulated.clone()
            }
        }
    }

    fn scrub_head(text: &str) -> &str {
        text.strip_prefix(':').unwrap_or(text).trim_start()
    }
}
