//! Chat call parameters
//!
//! Bundles the model knobs with the two guards applied before every call:
//! greedy newest-first truncation of the message queue against a token
//! budget, and a hard ceiling on the total prompt size above which the call
//! is not made at all.

use corpus_chat_config::ChatSettings;

use crate::client::{ChatRequest, LlmClient, WireMessage};
use crate::tokens::{num_tokens_from_messages, num_tokens_from_string};
use crate::LlmError;

/// Canned reply used instead of a call when the prompt exceeds the ceiling.
pub(crate) const TOO_MUCH_CONTEXT: &str = "There is too much information in the prompt so we are \
     unable to answer this question. Please try again or word the question differently";

#[derive(Debug, Clone)]
pub struct ChatParameters {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Budget used when truncating the message queue
    pub history_token_budget: usize,
    /// Ceiling on the total prompt; above it the call is skipped
    pub prompt_token_ceiling: usize,
}

impl ChatParameters {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.0,
            max_output_tokens: 500,
            history_token_budget: 3500,
            prompt_token_ceiling: 15_000,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn with_history_token_budget(mut self, budget: usize) -> Self {
        self.history_token_budget = budget;
        self
    }

    /// Truncate the queue to the token budget.
    ///
    /// The system message (when present) and the newest message are always
    /// kept, even if they alone exceed the budget; older messages are added
    /// newest-first until the next one would not fit.
    pub fn truncate_message_list(
        &self,
        system_message: Option<&WireMessage>,
        messages: &[WireMessage],
    ) -> Vec<WireMessage> {
        let mut truncated: Vec<WireMessage> = Vec::new();
        if let Some(system) = system_message {
            truncated.push(system.clone());
        }
        let Some(last) = messages.last() else {
            return truncated;
        };

        let mut token_count = truncated
            .iter()
            .map(|m| num_tokens_from_string(&m.content))
            .sum::<usize>()
            + num_tokens_from_string(&last.content);

        let mut kept = 1;
        for message in messages.iter().rev().skip(1) {
            let next_tokens = num_tokens_from_string(&message.content);
            if token_count + next_tokens > self.history_token_budget {
                break;
            }
            token_count += next_tokens;
            kept += 1;
        }

        truncated.extend(messages[messages.len() - kept..].iter().cloned());
        truncated
    }

    /// Truncate, enforce the prompt ceiling, then make one chat call.
    pub async fn respond(
        &self,
        client: &dyn LlmClient,
        system_message: Option<&WireMessage>,
        messages: &[WireMessage],
    ) -> Result<String, LlmError> {
        let truncated = self.truncate_message_list(system_message, messages);

        let total_tokens = num_tokens_from_messages(&truncated);
        if total_tokens > self.prompt_token_ceiling {
            tracing::warn!(
                total_tokens,
                ceiling = self.prompt_token_ceiling,
                "prompt exceeds the token ceiling, skipping the call"
            );
            return Ok(TOO_MUCH_CONTEXT.to_string());
        }

        client
            .chat(ChatRequest {
                model: self.model.clone(),
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
                messages: truncated,
            })
            .await
    }
}

impl From<&ChatSettings> for ChatParameters {
    fn from(settings: &ChatSettings) -> Self {
        Self {
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_output_tokens: settings.max_output_tokens,
            history_token_budget: settings.history_token_budget,
            prompt_token_ceiling: settings.prompt_token_ceiling,
        }
    }
}
