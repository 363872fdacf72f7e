use tracing::debug;

use crate::models::chat::{ChatMessage, MessageRole, PromptMessage};
use crate::utils::error::ChatError;
use crate::utils::token_estimator::{estimate_tokens, truncate_middle};

/// Builds the model-facing window from stored history.
#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    /// Rune budget for dialogue messages. Zero disables the limit.
    input_max_token: usize,
}

impl ContextAssembler {
    pub fn new(input_max_token: usize) -> Self {
        Self { input_max_token }
    }

    /// `history` is chronological and ends with the message being answered.
    ///
    /// Selection walks newest to oldest and stops at the first message that
    /// would overflow the budget. A newest message that alone overflows is
    /// cut to its head and tail and sent without any older context.
    pub fn assemble(&self, system: &str, history: &[ChatMessage]) -> Result<Vec<PromptMessage>, ChatError> {
        let budget = self.input_max_token;
        let mut selected: Vec<PromptMessage> = Vec::new();
        let mut used = 0usize;

        for message in history.iter().rev().filter(|m| m.is_dialogue()) {
            let tokens = estimate_tokens(&message.text);

            if budget > 0 && selected.is_empty() && tokens > budget {
                selected.push(PromptMessage::new(message.role, truncate_middle(&message.text, budget)));
                break;
            }
            if budget > 0 && used + tokens > budget {
                break;
            }

            used += tokens;
            selected.push(PromptMessage::new(message.role, message.text.clone()));
        }

        selected.reverse();

        let Some(first) = selected.first() else {
            return Err(ChatError::AiChat("no dialogue message to send".to_string()));
        };
        if first.role != MessageRole::User.as_str() {
            if selected.len() < 2 {
                return Err(ChatError::AiChat("context window has no user message".to_string()));
            }
            selected.remove(0);
        }

        debug!(
            "Assembled context: {} message(s), {} rune(s), budget {}",
            selected.len(),
            used,
            budget
        );

        let mut window = Vec::with_capacity(selected.len() + 1);
        window.push(PromptMessage::new(MessageRole::System, system));
        window.extend(selected);
        Ok(window)
    }
}
