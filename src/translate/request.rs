//! Turn a client chat request into provider call parameters.
//!
//! Message content is not rewritten: the client's text/parts union is the
//! provider's union, so the only real work is checking roles and deciding
//! which optional keys go on the wire.

use crate::config::SamplingConfig;
use crate::error::{RelayError, Result};

use super::client_types::{InboundMessage, ReasoningEffort, Role};
use super::provider_types::{ChatMessage, ChatParams};

/// Substring identifying the open-weight reasoning model family.
const REASONING_FAMILY_MARKER: &str = "gpt-oss";

/// Whether `model` belongs to the family that can return auxiliary reasoning
/// alongside its answer.
pub fn is_reasoning_model(model: &str) -> bool {
    model.to_lowercase().contains(REASONING_FAMILY_MARKER)
}

/// The requested model, or `default` when the caller sent none or a blank one.
pub fn effective_model(requested: Option<&str>, default: &str) -> String {
    requested
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Validate roles and build the provider parameters.
/// Pure function: order and content shape of `messages` are preserved.
pub fn normalize(
    messages: &[InboundMessage],
    model: &str,
    reasoning_effort: Option<ReasoningEffort>,
    stream: bool,
) -> Result<ChatParams> {
    let messages = messages
        .iter()
        .enumerate()
        .map(|(i, msg)| {
            let role = Role::parse(&msg.role).ok_or_else(|| {
                RelayError::validation(format!(
                    "messages[{}].role must be one of system, user, assistant (got '{}')",
                    i, msg.role
                ))
            })?;
            Ok(ChatMessage {
                role,
                content: msg.content.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ChatParams {
        model: model.to_string(),
        messages,
        stream,
        reasoning_effort,
        include_reasoning: None,
        temperature: None,
        max_completion_tokens: None,
    })
}

impl ChatParams {
    /// Apply the configured sampling parameters. Unset values stay off the wire.
    #[must_use]
    pub fn with_sampling(mut self, sampling: &SamplingConfig) -> Self {
        self.temperature = sampling.temperature;
        self.max_completion_tokens = sampling.max_completion_tokens;
        self
    }

    /// Ask the provider to return reasoning separately from the answer.
    #[must_use]
    pub fn with_auxiliary_reasoning(mut self) -> Self {
        self.include_reasoning = Some(true);
        self
    }
}
