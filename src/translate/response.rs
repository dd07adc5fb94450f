//! Read a provider completion and compose the client-facing answer.

use crate::error::{RelayError, Result};

use super::provider_types::ChatCompletionResponse;

/// Fence that delimits the reasoning section of a composed answer.
pub const SECTION_FENCE: &str = "```";
/// Stands in for [`SECTION_FENCE`] inside provider reasoning (U+02CB x3).
pub const FENCE_REPLACEMENT: &str = "\u{02CB}\u{02CB}\u{02CB}";

pub const REASONING_HEADING: &str = "**Reasoning**";
pub const ANSWER_HEADING: &str = "**Final answer**";

/// What the provider returned, resolved once at the schema boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderReply {
    Answer(String),
    Reasoned { answer: String, reasoning: String },
}

impl ProviderReply {
    /// Extract the first choice. The answer text is required; reasoning that
    /// is missing, blank, or not a string is treated as absent.
    pub fn from_completion(resp: &ChatCompletionResponse) -> Result<Self> {
        let choice = resp.choices.first().ok_or_else(|| {
            RelayError::translation("Provider response contained no choices")
        })?;

        let answer = choice
            .message
            .content
            .as_ref()
            .and_then(content_text)
            .ok_or_else(|| {
                RelayError::translation("Provider response message has no text content")
            })?;

        let reasoning = choice
            .message
            .reasoning
            .as_ref()
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty());

        Ok(match reasoning {
            Some(reasoning) => Self::Reasoned {
                answer,
                reasoning: reasoning.to_string(),
            },
            None => Self::Answer(answer),
        })
    }

    pub fn answer(&self) -> &str {
        match self {
            Self::Answer(answer) | Self::Reasoned { answer, .. } => answer,
        }
    }

    pub fn reasoning(&self) -> Option<&str> {
        match self {
            Self::Answer(_) => None,
            Self::Reasoned { reasoning, .. } => Some(reasoning),
        }
    }
}

/// The answer for one non-streaming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedResponse {
    pub answer: String,
    pub reasoning: Option<String>,
}

impl ComposedResponse {
    /// Reasoning is kept only when it was asked for.
    pub fn from_reply(reply: ProviderReply, wants_auxiliary_reasoning: bool) -> Self {
        match reply {
            ProviderReply::Reasoned { answer, reasoning } if wants_auxiliary_reasoning => Self {
                answer,
                reasoning: Some(reasoning),
            },
            ProviderReply::Reasoned { answer, .. } | ProviderReply::Answer(answer) => Self {
                answer,
                reasoning: None,
            },
        }
    }

    /// Render as the document returned to the client. Without reasoning this
    /// is the answer unchanged.
    pub fn render(&self) -> String {
        match self.reasoning {
            Some(ref reasoning) => format!(
                "{REASONING_HEADING}\n\n{SECTION_FENCE}text\n{}\n{SECTION_FENCE}\n\n{ANSWER_HEADING}\n\n{}",
                sanitize_reasoning(reasoning),
                self.answer
            ),
            None => self.answer.clone(),
        }
    }
}

/// Flatten message content into text. A plain string is taken as is; an
/// array contributes the `text` of each part, other parts are skipped.
fn content_text(content: &serde_json::Value) -> Option<String> {
    match content {
        serde_json::Value::String(text) => Some(text.clone()),
        serde_json::Value::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter(|part| {
                    part.get("type")
                        .and_then(|t| t.as_str())
                        .map_or(true, |t| t == "text")
                })
                .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                .collect();
            (!texts.is_empty()).then(|| texts.concat())
        }
        _ => None,
    }
}

/// Neutralize every fence inside provider reasoning so it cannot close the
/// reasoning section early.
pub fn sanitize_reasoning(text: &str) -> String {
    text.trim().replace(SECTION_FENCE, FENCE_REPLACEMENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::provider_types::*;

    fn completion(content: Option<&str>, reasoning: Option<serde_json::Value>) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: "chatcmpl-abc123".to_string(),
            model: "gpt-oss-120b".to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChoiceMessage {
                    role: Some("assistant".to_string()),
                    content: content.map(|c| serde_json::Value::String(c.to_string())),
                    reasoning,
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        }
    }

    /// Split a rendered document into (reasoning, answer).
    fn sections(doc: &str) -> (String, String) {
        let open = format!("{SECTION_FENCE}text\n");
        let start = doc.find(&open).expect("opening fence") + open.len();
        let close = doc[start..].find(&format!("\n{SECTION_FENCE}")).expect("closing fence") + start;
        let reasoning = doc[start..close].to_string();
        let rest = &doc[close + 1 + SECTION_FENCE.len()..];
        let answer_start = rest.find(ANSWER_HEADING).expect("answer heading") + ANSWER_HEADING.len();
        (reasoning, rest[answer_start..].trim_start().to_string())
    }

    #[test]
    fn test_reasoned_reply_is_composed() {
        let resp = completion(Some("Paris"), Some(serde_json::json!("France's capital")));
        let reply = ProviderReply::from_completion(&resp).unwrap();
        assert_eq!(reply.reasoning(), Some("France's capital"));

        let doc = ComposedResponse::from_reply(reply, true).render();
        assert!(doc.starts_with(REASONING_HEADING));
        let (reasoning, answer) = sections(&doc);
        assert_eq!(reasoning, "France's capital");
        assert_eq!(answer, "Paris");
    }

    #[test]
    fn test_reasoning_ignored_when_not_wanted() {
        let resp = completion(Some("Paris"), Some(serde_json::json!("France's capital")));
        let reply = ProviderReply::from_completion(&resp).unwrap();

        let composed = ComposedResponse::from_reply(reply, false);
        assert!(composed.reasoning.is_none());
        assert_eq!(composed.render(), "Paris");
    }

    #[test]
    fn test_fence_in_reasoning_is_neutralized() {
        let reasoning = "try this:\n```python\nprint(1)\n```\nthen ````` too";
        let resp = completion(Some("done ```rust\nfn main() {}\n```"), Some(serde_json::json!(reasoning)));
        let reply = ProviderReply::from_completion(&resp).unwrap();
        let doc = ComposedResponse::from_reply(reply, true).render();

        let (section, answer) = sections(&doc);
        assert!(!section.contains(SECTION_FENCE));
        assert!(section.contains(FENCE_REPLACEMENT));
        assert!(section.contains("print(1)"));
        // the answer keeps its own code fences untouched
        assert_eq!(answer, "done ```rust\nfn main() {}\n```");
        assert_eq!(doc.matches(ANSWER_HEADING).count(), 1);
    }

    #[test]
    fn test_non_string_or_blank_reasoning_is_absent() {
        for value in [
            serde_json::json!({"steps": []}),
            serde_json::json!(42),
            serde_json::json!("   "),
            serde_json::Value::Null,
        ] {
            let resp = completion(Some("ok"), Some(value));
            let reply = ProviderReply::from_completion(&resp).unwrap();
            assert_eq!(reply, ProviderReply::Answer("ok".to_string()));
        }
    }

    #[test]
    fn test_reasoning_content_alias() {
        let resp: ChatCompletionResponse = serde_json::from_value(serde_json::json!({
            "id": "x",
            "model": "deepseek-r1",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "42", "reasoning_content": "6 * 7"},
                "finish_reason": "stop"
            }]
        }))
        .unwrap();

        let reply = ProviderReply::from_completion(&resp).unwrap();
        assert_eq!(reply.answer(), "42");
        assert_eq!(reply.reasoning(), Some("6 * 7"));
    }

    #[test]
    fn test_answer_from_content_parts() {
        let resp: ChatCompletionResponse = serde_json::from_value(serde_json::json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": [
                    {"type": "text", "text": "Par"},
                    {"type": "image_url", "image_url": {"url": "https://example.com/x.png"}},
                    {"type": "text", "text": "is"}
                ]}
            }]
        }))
        .unwrap();

        let reply = ProviderReply::from_completion(&resp).unwrap();
        assert_eq!(reply, ProviderReply::Answer("Paris".to_string()));
    }

    #[test]
    fn test_content_without_text_is_an_error() {
        let resp: ChatCompletionResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"index": 0, "message": {"content": [{"type": "refusal", "refusal": "no"}]}}]
        }))
        .unwrap();
        assert!(ProviderReply::from_completion(&resp).unwrap_err().to_string().contains("no text content"));

        let mut numeric = completion(None, None);
        numeric.choices[0].message.content = Some(serde_json::json!(42));
        assert!(ProviderReply::from_completion(&numeric).is_err());
    }

    #[test]
    fn test_missing_answer_is_an_error() {
        let mut resp = completion(None, None);
        assert!(ProviderReply::from_completion(&resp).is_err());

        resp.choices.clear();
        let err = ProviderReply::from_completion(&resp).unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }
}
