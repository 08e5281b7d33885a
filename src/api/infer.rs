//! Extended inference API types.
//!
//! The `/infer` endpoint accepts everything the chat-completions endpoint does
//! plus a context identifier pair and per-request instructions: conversation
//! persistence, prefix/suffix injection and lateral streaming.

use serde::{Deserialize, Serialize};

use super::openai_compat::{ChatCompletionResponse, ChatMessage, FunctionSpec};

/// Caller-chosen identifier pair scoping conversation history and
/// lateral-stream state to a logical session/slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceContext {
    #[serde(default = "default_context_part")]
    pub id: String,
    #[serde(default = "default_context_part")]
    pub key: String,
}

impl Default for InferenceContext {
    fn default() -> Self {
        Self {
            id: default_context_part(),
            key: default_context_part(),
        }
    }
}

/// Text injected around the generated response.
///
/// `include_in_output` controls the caller-visible text; storage-time
/// inclusion is the inverse (text already visible is not added again when the
/// turn is persisted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextInstruction {
    pub text: String,
    #[serde(default = "default_true")]
    pub include_in_output: bool,
}

/// Conversation persistence options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationOptions {
    /// Append the new turn to the history stored under this key
    #[serde(default)]
    pub store_key: Option<String>,

    /// Overwrite the store key with the full history plus the new turn
    #[serde(default)]
    pub store_entire_history: bool,

    /// Load prior history from this key and splice it into the request
    #[serde(default)]
    pub load_key: Option<String>,

    /// Stored entries tagged with this name are replayed with the assistant
    /// role; everything else is replayed as user
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,
}

/// Per-request orchestration instructions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceInstructions {
    /// Accepted on the wire, not yet implemented
    #[serde(default)]
    pub force_json: bool,

    #[serde(default)]
    pub conversation: Option<ConversationOptions>,

    #[serde(default)]
    pub add_prefix: Option<TextInstruction>,

    #[serde(default)]
    pub add_suffix: Option<TextInstruction>,

    /// Mirror every streamed chunk to the lateral stream record
    #[serde(default)]
    pub enable_lateral_stream: bool,

    /// Accepted on the wire, not yet implemented
    #[serde(default)]
    pub check_for_dedup: bool,
}

/// Run Inference Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    #[serde(default)]
    pub context: InferenceContext,
    pub messages: Vec<ChatMessage>,
    pub model: String,
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default)]
    pub functions: Option<Vec<FunctionSpec>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub instructions: InferenceInstructions,
}

/// The inference endpoint answers with the chat-completion shape.
pub type InferenceResponse = ChatCompletionResponse;

fn default_context_part() -> String {
    "default".to_owned()
}

fn default_assistant_name() -> String {
    "default".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_num_ctx() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.2
}

fn default_top_p() -> f32 {
    0.9
}

fn default_top_k() -> u32 {
    40
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::openai_compat::Role;

    #[test]
    fn request_defaults_from_minimal_json() {
        let req: InferenceRequest = serde_json::from_str(
            r#"{"model":"mistral","messages":[{"role":"user","content":"hi"}]}"#,
        )
        .unwrap();

        assert_eq!(req.context.id, "default");
        assert_eq!(req.context.key, "default");
        assert_eq!(req.num_ctx, 4096);
        assert_eq!(req.temperature, 0.2);
        assert_eq!(req.top_p, 0.9);
        assert_eq!(req.top_k, 40);
        assert!(!req.stream);
        assert!(req.instructions.conversation.is_none());
        assert_eq!(req.messages[0].role, Role::User);
    }

    #[test]
    fn conversation_options_defaults() {
        let opts: ConversationOptions =
            serde_json::from_str(r#"{"load_key":"chat-1"}"#).unwrap();
        assert_eq!(opts.load_key.as_deref(), Some("chat-1"));
        assert!(opts.store_key.is_none());
        assert!(!opts.store_entire_history);
        assert_eq!(opts.assistant_name, "default");
    }
}
