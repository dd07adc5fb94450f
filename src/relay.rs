use crate::audio::{self, AudioUpload};
use crate::error::{RelayError, Result};
use crate::logging::RequestLogger;
use crate::provider::ChatProvider;
use crate::translate::provider_types::ChatParams;
use crate::translate::response::ComposedResponse;

use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;
use std::sync::Arc;

/// Prefix of the fragment that ends a failed stream.
pub const ERROR_MARKER: &str = "[error]";

pub const NOT_CONFIGURED: &str = "Server API key not configured.";

const REDACTED: &str = "The upstream provider request failed.";

/// Fragments as sent to the client. Failures arrive as a final fragment, so
/// the item type carries no error.
pub type TextStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Owns the provider handle. `None` when the provider could not be built at
/// startup, in which case every call short-circuits without network I/O.
#[derive(Clone)]
pub struct Relay {
    provider: Option<Arc<dyn ChatProvider>>,
    redact_errors: bool,
}

impl Relay {
    pub fn new(provider: Option<Arc<dyn ChatProvider>>) -> Self {
        Self {
            provider,
            redact_errors: false,
        }
    }

    /// Keep upstream error detail out of stream fragments.
    #[must_use]
    pub fn with_redacted_errors(mut self, redact: bool) -> Self {
        self.redact_errors = redact;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.provider.as_deref().map(|p| p.name())
    }

    fn provider(&self) -> Result<&Arc<dyn ChatProvider>> {
        self.provider
            .as_ref()
            .ok_or_else(|| RelayError::config(NOT_CONFIGURED))
    }

    /// Relay a streaming completion as text fragments.
    ///
    /// Non-empty provider text is yielded as soon as it arrives. Any failure,
    /// including a missing provider, becomes one trailing fragment starting
    /// with [`ERROR_MARKER`] and ends the stream. Dropping the stream drops the
    /// upstream response with it.
    pub fn stream_chat(&self, mut params: ChatParams, log: RequestLogger) -> TextStream {
        params.stream = true;
        let provider = self.provider.clone();
        let redact = self.redact_errors;

        Box::pin(async_stream::stream! {
            let provider = match provider {
                Some(p) => p,
                None => {
                    log.error(NOT_CONFIGURED);
                    yield error_fragment(NOT_CONFIGURED);
                    return;
                }
            };

            log.info(format!(
                "Streaming model={} messages={} reasoning_effort={:?}",
                params.model,
                params.messages.len(),
                params.reasoning_effort
            ));

            let mut fragments = match provider.stream_chat(&params).await {
                Ok(s) => s,
                Err(e) => {
                    log.error(format!("Streaming setup failed: {}", e));
                    yield error_fragment(&client_message(&e, redact));
                    return;
                }
            };

            let mut count = 0usize;
            let mut bytes = 0usize;
            while let Some(item) = fragments.next().await {
                match item {
                    Ok(text) if text.is_empty() => {}
                    Ok(text) => {
                        count += 1;
                        bytes += text.len();
                        yield text;
                    }
                    Err(e) => {
                        log.error(format!("Stream failed after {} fragments: {}", count, e));
                        yield error_fragment(&client_message(&e, redact));
                        return;
                    }
                }
            }

            log.info(format!("Stream completed: fragments={} bytes={}", count, bytes));
        })
    }

    /// One blocking completion, composed with reasoning when
    /// `wants_auxiliary_reasoning` is set and the provider supplied some.
    pub async fn compose_chat(
        &self,
        mut params: ChatParams,
        wants_auxiliary_reasoning: bool,
        log: &RequestLogger,
    ) -> Result<ComposedResponse> {
        let provider = self.provider()?;

        params.stream = false;
        if wants_auxiliary_reasoning {
            params = params.with_auxiliary_reasoning();
        }

        log.info(format!(
            "Completion model={} messages={} auxiliary_reasoning={}",
            params.model,
            params.messages.len(),
            wants_auxiliary_reasoning
        ));

        let reply = provider.chat(&params).await?;
        let composed = ComposedResponse::from_reply(reply, wants_auxiliary_reasoning);

        log.info(format!(
            "Completed: answer_len={} reasoning={}",
            composed.answer.len(),
            composed.reasoning.is_some()
        ));

        Ok(composed)
    }

    /// Validate the upload and forward it for plain-text transcription.
    pub async fn transcribe(
        &self,
        upload: AudioUpload,
        model: &str,
        log: &RequestLogger,
    ) -> Result<String> {
        let provider = self.provider()?;
        let file = audio::validate(upload)?;

        log.info(format!(
            "Transcribing file={} bytes={} model={}",
            file.filename,
            file.bytes.len(),
            model
        ));

        let text = provider.transcribe(file, model).await?;
        log.info(format!("Transcribed: text_len={}", text.len()));
        Ok(text)
    }
}

fn error_fragment(message: &str) -> String {
    format!("\n\n{} {}", ERROR_MARKER, message)
}

fn client_message(err: &RelayError, redact: bool) -> String {
    if redact {
        REDACTED.to_string()
    } else {
        err.to_string()
    }
}
