//! Function-call codec.
//!
//! Injects a function catalog as a trailing system message, and later
//! extracts a structured call from free-form model output. The model signals
//! an invocation by emitting a single JSON object tagged `FUNC_CALL`; anything
//! around the object (narration, markdown fences) is discarded.

use crate::api::openai_compat::{ChatMessage, FunctionCall, FunctionSpec, Role};
use crate::error::{Error, Result};

/// Marker the model is instructed to place in structured output.
pub const FUNCTION_CALL_MARKER: &str = "FUNC_CALL";

/// Append one system message describing the function catalog and the required
/// output contract. Always appended last, after any existing messages. A
/// missing or empty catalog leaves the messages untouched.
pub fn inject_catalog(functions: Option<&[FunctionSpec]>, messages: &mut Vec<ChatMessage>) {
    let functions = match functions {
        Some(f) if !f.is_empty() => f,
        _ => return,
    };

    let mut system = String::from(
        "You may use the following FUNCTIONS in the response. Only use one function at a time. \
         Give output in following OUTPUT_FORMAT in strict JSON if you want to call a function.\n\
         FUNCTIONS:\n",
    );
    for (i, f) in functions.iter().enumerate() {
        system.push_str(&format!("{}. Name: {}\n", i + 1, f.name));
        system.push_str(&f.description);
        system.push('\n');
        system.push_str("Parameters:\n");
        system.push_str(&f.parameters.to_string());
        system.push_str("\n\n\n");
    }
    system.push_str(
        "OUTPUT_FORMAT:\n\
         {\n\
         \x20   \"type\": \"FUNC_CALL\",\n\
         \x20   \"name\": \"<name of function>\",\n\
         \x20   \"parameters\": \"<parameters to pass to function>\"\n\
         }\n",
    );

    messages.push(ChatMessage::new(Role::System, system));
}

/// Extract a structured call from model output.
///
/// Returns the cleaned text and, when the marker is present and the payload
/// parses, the call. Without the marker the text passes through unchanged.
/// A marker with an unparseable payload is `MalformedStructuredOutput`; the
/// orchestrator retries the whole generation attempt rather than repairing
/// the text further.
pub fn extract(text: &str) -> Result<(String, Option<FunctionCall>)> {
    if !text.contains(FUNCTION_CALL_MARKER) {
        return Ok((text.to_owned(), None));
    }

    let cleaned = isolate_json_object(text)?;
    let value: serde_json::Value = serde_json::from_str(&cleaned)
        .map_err(|e| Error::MalformedStructuredOutput(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| Error::MalformedStructuredOutput("payload is not a JSON object".into()))?;

    let name = obj
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_owned();
    let parameters = obj.get("parameters").cloned().unwrap_or(serde_json::Value::Null);
    let arguments = serde_json::to_string(&parameters)
        .map_err(|e| Error::MalformedStructuredOutput(e.to_string()))?;

    Ok((cleaned, Some(FunctionCall { name, arguments })))
}

/// Substring from the first `{` to the last `}`, discarding surrounding noise.
fn isolate_json_object(text: &str) -> Result<String> {
    let start = text
        .find('{')
        .ok_or_else(|| Error::MalformedStructuredOutput("no opening brace".into()))?;
    let end = text
        .rfind('}')
        .filter(|&end| end >= start)
        .ok_or_else(|| Error::MalformedStructuredOutput("no closing brace".into()))?;
    Ok(text[start..=end].to_owned())
}
