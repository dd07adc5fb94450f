//! The provider seam.
//!
//! [`ChatProvider`] is what the relay talks to; [`HttpProvider`] implements it
//! against an OpenAI-compatible HTTP API. Tests substitute their own stub.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::Stream;
use reqwest::multipart::{Form, Part};

use crate::audio::AudioFile;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::translate::provider_types::{ChatCompletionResponse, ChatErrorResponse, ChatParams};
use crate::translate::response::ProviderReply;
use crate::translate::streaming::text_fragments;

/// Text fragments from a live completion. The first `Err` is the last item.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Open a streaming completion.
    async fn stream_chat(&self, params: &ChatParams) -> Result<FragmentStream>;

    /// One blocking completion.
    async fn chat(&self, params: &ChatParams) -> Result<ProviderReply>;

    /// Transcribe audio to plain text.
    async fn transcribe(&self, file: AudioFile, model: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct HttpProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    transcription: bool,
}

impl HttpProvider {
    pub fn new(
        name: impl Into<String>,
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            transcription: true,
        }
    }

    /// Build from config. Fails when the API key or base URL cannot be
    /// resolved; the caller decides whether that is fatal.
    pub fn from_config(config: &RelayConfig, client: reqwest::Client) -> Result<Self> {
        let base_url = config.effective_base_url()?;
        let api_key = config.resolve_api_key()?;

        let mut provider = Self::new(config.provider.name.clone(), client, base_url, api_key);
        provider.transcription = config.supports_transcription();
        Ok(provider)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post_json(&self, params: &ChatParams) -> Result<reqwest::Response> {
        let url = self.url("chat/completions");
        tracing::debug!(%url, model = %params.model, stream = params.stream, "POST");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(params)
            .send()
            .await
            .map_err(|e| RelayError::provider(format!("Request failed: {}", e)))?;

        check_status(response).await
    }
}

#[async_trait]
impl ChatProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_chat(&self, params: &ChatParams) -> Result<FragmentStream> {
        let response = self.post_json(params).await?;
        Ok(Box::pin(text_fragments(response.bytes_stream())))
    }

    async fn chat(&self, params: &ChatParams) -> Result<ProviderReply> {
        let response = self.post_json(params).await?;
        let body = response
            .text()
            .await
            .map_err(|e| RelayError::provider(format!("Failed to read response body: {}", e)))?;

        let completion: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
            RelayError::translation(format!(
                "Failed to parse provider response: {}. Body: {}",
                e,
                truncate(&body, 300)
            ))
        })?;

        if let Some(ref usage) = completion.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Completion usage"
            );
        }

        ProviderReply::from_completion(&completion)
    }

    async fn transcribe(&self, file: AudioFile, model: &str) -> Result<String> {
        if !self.transcription {
            return Err(RelayError::config(format!(
                "Provider '{}' does not offer audio transcription",
                self.name
            )));
        }

        let url = self.url("audio/transcriptions");
        tracing::debug!(%url, model, filename = %file.filename, bytes = file.bytes.len(), "POST");

        let form = Form::new()
            .part("file", audio_part(file))
            .text("model", model.to_string())
            .text("response_format", "text");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RelayError::provider(format!("Transcription request failed: {}", e)))?;

        let body = check_status(response)
            .await?
            .text()
            .await
            .map_err(|e| RelayError::provider(format!("Failed to read transcription: {}", e)))?;

        Ok(transcription_text(&body))
    }
}

fn audio_part(file: AudioFile) -> Part {
    let AudioFile {
        bytes,
        filename,
        content_type,
    } = file;

    let len = bytes.len() as u64;
    let part = |bytes: Bytes| Part::stream_with_length(bytes, len).file_name(filename.clone());

    let Some(ct) = content_type else {
        return part(bytes);
    };
    // `Bytes` clones share the buffer.
    match part(bytes.clone()).mime_str(&ct) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(content_type = %ct, error = %e, "Sending upload without its content type");
            part(bytes)
        }
    }
}

/// Providers asked for `text` normally answer with the bare transcript, but a
/// few still wrap it as `{"text": ...}`.
fn transcription_text(body: &str) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(text) = map.get("text").and_then(|t| t.as_str()) {
            return text.to_string();
        }
    }
    body.trim_end_matches(['\r', '\n']).to_string()
}

/// Turn a non-2xx response into a provider error carrying the upstream message.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ChatErrorResponse>(&body) {
        Ok(err) => err.error.message,
        Err(_) => truncate(&body, 500).to_string(),
    };

    Err(RelayError::provider(format!(
        "Provider returned status {}: {}",
        status.as_u16(),
        message
    )))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
