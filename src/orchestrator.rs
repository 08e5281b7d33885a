//! Inference orchestrator.
//!
//! Drives one inference request end to end: validation, optional history
//! load, catalog injection, prompt rendering, the streaming call with bounded
//! self-healing retry, optional lateral-stream mirroring, optional history
//! persistence, and response assembly. One call is one logical flow; all
//! cross-request coordination lives in the key-value store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::infer::{
    ConversationOptions, InferenceInstructions, InferenceRequest, InferenceResponse,
    TextInstruction,
};
use crate::api::openai_compat::{
    AssistantMessage, ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
    FunctionCall, Role, Usage,
};
use crate::backend::{GenerateChunk, GenerateOptions, GenerateRequest, GenerationBackend};
use crate::conversation::{ConversationEntry, ConversationStore};
use crate::error::{Error, Result};
use crate::functions;
use crate::lateral::LateralStreamBridge;
use crate::prompt;
use crate::store::KvStore;

use futures::StreamExt;

/// Cap on the Streaming -> Validating-Output cycle. Malformed structured
/// output and degenerate short completions restart the attempt; once the
/// budget runs out the request fails with `RetriesExhausted`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

pub struct Orchestrator {
    backend: Arc<dyn GenerationBackend>,
    conversations: ConversationStore,
    lateral: LateralStreamBridge,
    retry: RetryPolicy,
}

/// One finished generation attempt, after output validation.
struct AttemptOutcome {
    text: String,
    call: Option<FunctionCall>,
    created_at: String,
    eval_count: Option<u64>,
    prompt_eval_count: Option<u64>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        kv: Arc<dyn KvStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            conversations: ConversationStore::new(Arc::clone(&kv)),
            lateral: LateralStreamBridge::new(kv),
            retry,
        }
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn lateral(&self) -> &LateralStreamBridge {
        &self.lateral
    }

    pub fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.backend
    }

    /// The extended inference flow: history, lateral streaming, prefix/suffix
    /// injection and structured-output validation.
    pub async fn infer(&self, req: InferenceRequest) -> Result<InferenceResponse> {
        validate(&req)?;

        // The triggering user turn is captured before catalog injection so the
        // stored history never contains the function-catalog system message.
        let user_turn = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone());

        let mut messages = req.messages.clone();
        if let Some(conv) = &req.instructions.conversation {
            if let Some(load_key) = &conv.load_key {
                self.splice_history(&req.context.id, load_key, &conv.assistant_name, &mut messages)
                    .await?;
            }
        }

        functions::inject_catalog(req.functions.as_deref(), &mut messages);
        let rendered = prompt::render(&req.model, &messages)?;

        let gen_req = GenerateRequest {
            model: req.model.clone(),
            prompt: rendered.prompt,
            options: GenerateOptions {
                temperature: req.temperature,
                top_p: req.top_p,
                top_k: req.top_k,
                num_ctx: req.num_ctx,
                stop: rendered.stop,
            },
        };

        let outcome = self.run_streaming_attempts(&gen_req, &req).await?;

        if let Some(conv) = &req.instructions.conversation {
            if let Some(store_key) = &conv.store_key {
                let user_turn = user_turn.unwrap_or_default();
                self.persist_turn(&req.context.id, store_key, conv, &req.instructions, &user_turn, &outcome)
                    .await?;
            }
        }

        Ok(assemble_response(&req.model, outcome, &req.instructions))
    }

    /// The single-shot completions flow: ChatML rendering, non-streaming
    /// backend call, no history, no lateral streaming. Degenerate outputs of
    /// two characters or fewer are re-run within the same retry budget.
    pub async fn chat_completion(
        &self,
        req: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse> {
        if req.stream.unwrap_or(false) {
            return Err(Error::UnsupportedStreaming);
        }

        let mut messages = req.messages.clone();
        functions::inject_catalog(req.functions.as_deref(), &mut messages);
        let rendered = prompt::render_chatml(&messages);

        let gen_req = GenerateRequest {
            model: req.model.clone(),
            prompt: rendered.prompt,
            options: GenerateOptions {
                temperature: req.temperature.unwrap_or(0.2),
                top_p: req.top_p.unwrap_or(0.9),
                num_ctx: req.max_tokens.unwrap_or(4096),
                stop: rendered.stop,
                ..GenerateOptions::default()
            },
        };

        for attempt in 1..=self.retry.max_attempts {
            let chunk = self.backend.generate(&gen_req).await?;
            let text = chunk.response.trim().to_owned();

            if text.len() <= 2 {
                warn!(attempt, "Completion too short, re-running inference");
                continue;
            }

            match functions::extract(&text) {
                Ok((cleaned, call)) => {
                    let outcome = AttemptOutcome {
                        text: cleaned,
                        call,
                        created_at: chunk.created_at,
                        eval_count: chunk.eval_count,
                        prompt_eval_count: chunk.prompt_eval_count,
                    };
                    return Ok(assemble_response(
                        &req.model,
                        outcome,
                        &InferenceInstructions::default(),
                    ));
                }
                Err(Error::MalformedStructuredOutput(reason)) => {
                    warn!(attempt, %reason, "Malformed structured output, retrying");
                }
                Err(other) => return Err(other),
            }
        }

        Err(Error::RetriesExhausted {
            attempts: self.retry.max_attempts,
        })
    }

    /// Load the stored history and splice it in right after the first message
    /// (the system prompt). Entries tagged with the assistant name replay as
    /// assistant turns, everything else as user turns.
    async fn splice_history(
        &self,
        ctx_id: &str,
        load_key: &str,
        assistant_name: &str,
        messages: &mut Vec<ChatMessage>,
    ) -> Result<()> {
        let history = self.conversations.load(ctx_id, load_key).await?;
        if history.is_empty() {
            warn!(ctx_id, load_key, "No stored conversation found for load key");
            return Ok(());
        }

        debug!(ctx_id, load_key, entries = history.len(), "Splicing stored conversation");
        let insert_at = messages.len().min(1);
        for (i, entry) in history.into_iter().enumerate() {
            let role = if entry.tag == assistant_name {
                Role::Assistant
            } else {
                Role::User
            };
            messages.insert(insert_at + i, ChatMessage::new(role, entry.content));
        }
        Ok(())
    }

    /// Streaming with bounded retry. Each attempt consumes the whole stream,
    /// mirroring cumulative chunks to the lateral record when enabled, then
    /// validates structured output. Only `MalformedStructuredOutput` restarts
    /// the attempt.
    async fn run_streaming_attempts(
        &self,
        gen_req: &GenerateRequest,
        req: &InferenceRequest,
    ) -> Result<AttemptOutcome> {
        for attempt in 1..=self.retry.max_attempts {
            let chunk = self.consume_stream(gen_req, req).await?;

            match functions::extract(&chunk.response) {
                Ok((cleaned, call)) => {
                    if attempt > 1 {
                        info!(attempt, "Generation recovered after retry");
                    }
                    return Ok(AttemptOutcome {
                        text: cleaned,
                        call,
                        created_at: chunk.created_at,
                        eval_count: chunk.eval_count,
                        prompt_eval_count: chunk.prompt_eval_count,
                    });
                }
                Err(Error::MalformedStructuredOutput(reason)) => {
                    warn!(attempt, %reason, "Malformed structured output, retrying generation");
                }
                Err(other) => return Err(other),
            }
        }

        Err(Error::RetriesExhausted {
            attempts: self.retry.max_attempts,
        })
    }

    /// Drive one streaming call to its terminal chunk. Chunks are cumulative;
    /// each lateral publish overwrites the previous snapshot with the display
    /// text (prefix on every chunk, suffix on the terminal one).
    async fn consume_stream(
        &self,
        gen_req: &GenerateRequest,
        req: &InferenceRequest,
    ) -> Result<GenerateChunk> {
        let mut stream = self.backend.generate_stream(gen_req).await?;
        let instr = &req.instructions;

        let mut terminal: Option<GenerateChunk> = None;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;

            if instr.enable_lateral_stream {
                let mut display = prefix_text(instr, true).to_owned();
                display.push_str(&chunk.response);
                if chunk.done {
                    display.push_str(suffix_text(instr, true));
                }
                self.lateral
                    .publish(&req.context.id, &req.context.key, &display, chunk.done)
                    .await?;
            }

            if chunk.done {
                terminal = Some(chunk);
                break;
            }
        }

        terminal.ok_or_else(|| {
            Error::BackendContract("stream ended without a terminal chunk".into())
        })
    }

    /// Persist the finished turn as a `(user, assistant)` entry pair. Storage
    /// applies prefix/suffix with the inverse of their display flags: text
    /// already shown to the caller is not stored again, and hidden text is.
    async fn persist_turn(
        &self,
        ctx_id: &str,
        store_key: &str,
        conv: &ConversationOptions,
        instr: &InferenceInstructions,
        user_turn: &str,
        outcome: &AttemptOutcome,
    ) -> Result<()> {
        let mut stored = prefix_text(instr, false).to_owned();
        stored.push_str(&outcome.text);
        stored.push_str(suffix_text(instr, false));

        let user_entry = ConversationEntry::new("user", user_turn);
        let assistant_entry = ConversationEntry::new(conv.assistant_name.as_str(), stored);

        if conv.store_entire_history {
            let reload_key = conv.load_key.as_deref().unwrap_or(store_key);
            let mut entries = self.conversations.load(ctx_id, reload_key).await?;
            entries.push(user_entry);
            entries.push(assistant_entry);
            info!(ctx_id, store_key, entries = entries.len(), "Storing full conversation history");
            self.conversations.overwrite(ctx_id, store_key, &entries).await
        } else {
            self.conversations.append(ctx_id, store_key, &user_entry).await?;
            self.conversations.append(ctx_id, store_key, &assistant_entry).await
        }
    }
}

fn validate(req: &InferenceRequest) -> Result<()> {
    if req.stream {
        return Err(Error::UnsupportedStreaming);
    }
    if !(0.0..=2.0).contains(&req.temperature) {
        return Err(Error::invalid_request("temperature must be within [0, 2]"));
    }
    if !(req.top_p > 0.0 && req.top_p <= 1.0) {
        return Err(Error::invalid_request("top_p must be within (0, 1]"));
    }
    if req.num_ctx == 0 {
        return Err(Error::invalid_request("num_ctx must be positive"));
    }

    if req.instructions.conversation.is_some() {
        let roles: Vec<Role> = req.messages.iter().map(|m| m.role).collect();
        if roles != [Role::System, Role::User] {
            return Err(Error::invalid_request(
                "conversation requests require exactly two messages: system then user",
            ));
        }
    }
    Ok(())
}

/// Prefix text for the given destination. `display` selects the caller-visible
/// flag; storage uses its inverse.
fn prefix_text(instr: &InferenceInstructions, display: bool) -> &str {
    instruction_text(instr.add_prefix.as_ref(), display)
}

fn suffix_text(instr: &InferenceInstructions, display: bool) -> &str {
    instruction_text(instr.add_suffix.as_ref(), display)
}

fn instruction_text(instruction: Option<&TextInstruction>, display: bool) -> &str {
    match instruction {
        Some(t) if t.include_in_output == display => &t.text,
        _ => "",
    }
}

fn assemble_response(
    model: &str,
    outcome: AttemptOutcome,
    instr: &InferenceInstructions,
) -> ChatCompletionResponse {
    let mut content = prefix_text(instr, true).to_owned();
    content.push_str(&outcome.text);
    content.push_str(suffix_text(instr, true));

    let created = DateTime::parse_from_rfc3339(&outcome.created_at)
        .map(|t| t.timestamp())
        .unwrap_or_else(|_| Utc::now().timestamp());

    let completion_tokens = outcome.eval_count.unwrap_or(0);
    let prompt_tokens = outcome.prompt_eval_count.unwrap_or(0);

    let finish_reason = if outcome.call.is_some() {
        "function_call"
    } else {
        "stop"
    };

    ChatCompletionResponse {
        id: format!("chatcmpl-{}", Uuid::new_v4()),
        object: "chat.completion".to_owned(),
        created,
        model: model.to_owned(),
        usage: Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
        choices: vec![ChatChoice {
            index: 0,
            message: AssistantMessage {
                role: Role::Assistant,
                content,
                function_call: outcome.call,
            },
            finish_reason: finish_reason.to_owned(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::infer::InferenceContext;

    fn base_request() -> InferenceRequest {
        serde_json::from_str(
            r#"{"model":"mistral","messages":[{"role":"user","content":"hi"}]}"#,
        )
        .unwrap()
    }

    #[test]
    fn direct_streaming_is_rejected() {
        let mut req = base_request();
        req.stream = true;
        assert!(matches!(validate(&req), Err(Error::UnsupportedStreaming)));
    }

    #[test]
    fn sampling_ranges_are_enforced() {
        let mut req = base_request();
        req.temperature = 2.5;
        assert!(matches!(validate(&req), Err(Error::InvalidRequest(_))));

        let mut req = base_request();
        req.top_p = 0.0;
        assert!(matches!(validate(&req), Err(Error::InvalidRequest(_))));

        let mut req = base_request();
        req.num_ctx = 0;
        assert!(matches!(validate(&req), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn conversation_requests_require_system_then_user() {
        let mut req = base_request();
        req.context = InferenceContext::default();
        req.instructions.conversation = Some(
            serde_json::from_str(r#"{"store_key":"chat"}"#).unwrap(),
        );
        // Single user message violates the shape.
        assert!(matches!(validate(&req), Err(Error::InvalidRequest(_))));

        req.messages = vec![
            ChatMessage::new(Role::System, "sys"),
            ChatMessage::new(Role::User, "hi"),
        ];
        assert!(validate(&req).is_ok());
    }

    #[test]
    fn instruction_text_respects_display_flags() {
        let shown = TextInstruction {
            text: "[pre]".to_owned(),
            include_in_output: true,
        };
        let hidden = TextInstruction {
            text: "[pre]".to_owned(),
            include_in_output: false,
        };

        assert_eq!(instruction_text(Some(&shown), true), "[pre]");
        assert_eq!(instruction_text(Some(&shown), false), "");
        assert_eq!(instruction_text(Some(&hidden), true), "");
        assert_eq!(instruction_text(Some(&hidden), false), "[pre]");
        assert_eq!(instruction_text(None, true), "");
    }

    #[test]
    fn response_assembly_defaults_missing_counters_to_zero() {
        let outcome = AttemptOutcome {
            text: "Hello!".to_owned(),
            call: None,
            created_at: "not-a-timestamp".to_owned(),
            eval_count: None,
            prompt_eval_count: Some(12),
        };
        let resp = assemble_response("mistral", outcome, &InferenceInstructions::default());

        assert_eq!(resp.usage.completion_tokens, 0);
        assert_eq!(resp.usage.prompt_tokens, 12);
        assert_eq!(resp.usage.total_tokens, 12);
        assert_eq!(resp.choices[0].finish_reason, "stop");
        assert!(resp.id.starts_with("chatcmpl-"));
        assert!(resp.created > 0);
    }

    #[test]
    fn response_assembly_reads_backend_timestamp() {
        let outcome = AttemptOutcome {
            text: "ok!".to_owned(),
            call: Some(FunctionCall {
                name: "f".to_owned(),
                arguments: "null".to_owned(),
            }),
            created_at: "2023-12-01T10:00:00Z".to_owned(),
            eval_count: Some(3),
            prompt_eval_count: Some(4),
        };
        let resp = assemble_response("mistral", outcome, &InferenceInstructions::default());

        assert_eq!(resp.created, 1701424800);
        assert_eq!(resp.usage.total_tokens, 7);
        assert_eq!(resp.choices[0].finish_reason, "function_call");
    }
}
