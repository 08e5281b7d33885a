//! Prompt composition.
//!
//! Renders a chat message sequence into the raw prompt string a model expects,
//! selecting the template from an ordered rule table matched against the model
//! name. Rendering is deterministic: identical inputs always produce the
//! identical prompt.

use crate::api::openai_compat::{ChatMessage, Role};
use crate::error::{Error, Result};

/// A rendered prompt together with the stop sequences the template demands.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPrompt {
    pub prompt: String,
    pub stop: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Template {
    /// `### User:` / `### Assistant:` over the first user message
    UserAssistantNewlines,
    /// `USER:` / `ASSISTANT:` over the first user message (vicuna style)
    Vicuna,
    /// Multi-turn ChatML framing, open assistant turn at the end
    ChatMl,
}

struct TemplateRule {
    matches: fn(&str) -> bool,
    template: Template,
}

/// Evaluated top to bottom; first match wins. The last rule is a catch-all.
const TEMPLATE_RULES: &[TemplateRule] = &[
    TemplateRule {
        matches: |model| model.contains("solar"),
        template: Template::UserAssistantNewlines,
    },
    TemplateRule {
        matches: |model| model.starts_with("nous-capybara"),
        template: Template::Vicuna,
    },
    TemplateRule {
        matches: |_| true,
        template: Template::ChatMl,
    },
];

/// Render `messages` into the prompt for `model`.
pub fn render(model: &str, messages: &[ChatMessage]) -> Result<RenderedPrompt> {
    let template = TEMPLATE_RULES
        .iter()
        .find(|rule| (rule.matches)(model))
        .map(|rule| rule.template)
        .unwrap_or(Template::ChatMl);

    match template {
        Template::ChatMl => Ok(render_chatml(messages)),
        Template::UserAssistantNewlines => {
            let user = first_user_message(model, messages)?;
            Ok(RenderedPrompt {
                prompt: format!("### User:\n{}\n\n### Assistant:", user.content),
                stop: vec!["</s>".to_owned()],
            })
        }
        Template::Vicuna => {
            let user = first_user_message(model, messages)?;
            Ok(RenderedPrompt {
                prompt: format!("USER: {}\nASSISTANT:", user.content),
                stop: vec!["</s>".to_owned()],
            })
        }
    }
}

/// Render with the default multi-turn ChatML template regardless of model.
/// The single-shot completions path always uses this.
pub fn render_chatml(messages: &[ChatMessage]) -> RenderedPrompt {
    let mut prompt = String::new();
    for msg in messages {
        prompt.push_str("<|im_start|>");
        prompt.push_str(msg.role.as_str());
        prompt.push('\n');
        prompt.push_str(&msg.content);
        prompt.push_str("<|im_end|>\n");
    }
    prompt.push_str("<|im_start|>assistant");

    RenderedPrompt {
        prompt,
        stop: vec!["<|im_start|>".to_owned(), "<|im_end|>".to_owned()],
    }
}

fn first_user_message<'a>(model: &str, messages: &'a [ChatMessage]) -> Result<&'a ChatMessage> {
    messages
        .iter()
        .find(|m| m.role == Role::User)
        .ok_or_else(|| Error::MissingRequiredRole {
            model: model.to_owned(),
            role: "user",
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs() -> Vec<ChatMessage> {
        vec![
            ChatMessage::new(Role::System, "You are helpful."),
            ChatMessage::new(Role::User, "Hello there"),
        ]
    }

    #[test]
    fn chatml_is_default_and_multi_turn() {
        let rendered = render("mistral", &msgs()).unwrap();
        assert_eq!(
            rendered.prompt,
            "<|im_start|>system\nYou are helpful.<|im_end|>\n\
             <|im_start|>user\nHello there<|im_end|>\n\
             <|im_start|>assistant"
        );
        assert_eq!(rendered.stop, vec!["<|im_start|>", "<|im_end|>"]);
    }

    #[test]
    fn solar_uses_user_assistant_newlines() {
        let rendered = render("solar-10b", &msgs()).unwrap();
        assert_eq!(rendered.prompt, "### User:\nHello there\n\n### Assistant:");
        assert_eq!(rendered.stop, vec!["</s>"]);
    }

    #[test]
    fn nous_capybara_prefix_uses_vicuna() {
        let rendered = render("nous-capybara-34b", &msgs()).unwrap();
        assert_eq!(rendered.prompt, "USER: Hello there\nASSISTANT:");
    }

    #[test]
    fn rule_order_is_first_match_wins() {
        // Contains "solar" and starts with "nous-capybara"; the solar rule
        // sits earlier in the table.
        let rendered = render("nous-capybara-solar", &msgs()).unwrap();
        assert!(rendered.prompt.starts_with("### User:"));
    }

    #[test]
    fn user_message_required_for_single_turn_templates() {
        let only_system = vec![ChatMessage::new(Role::System, "sys")];
        let err = render("solar", &only_system).unwrap_err();
        assert!(matches!(err, Error::MissingRequiredRole { role: "user", .. }));

        // ChatML has no such requirement
        assert!(render("mistral", &only_system).is_ok());
    }

    #[test]
    fn rendering_is_deterministic() {
        let a = render("mistral", &msgs()).unwrap();
        let b = render("mistral", &msgs()).unwrap();
        assert_eq!(a, b);
    }
}
