//! Decode the provider's SSE stream into text fragments.
//!
//! Each `data:` event carries one chat completion chunk. Only chunks with
//! non-empty delta text produce a fragment; role-only, usage and finish
//! chunks are dropped. `[DONE]` ends the stream.

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};

use crate::error::{RelayError, Result};

use super::provider_types::{ChatCompletionChunk, ChatErrorResponse};

const DONE_MARKER: &str = "[DONE]";

/// What a single SSE event means for the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkEvent {
    Fragment(String),
    Skip,
    Done,
}

/// Interpret the `data` payload of one SSE event.
pub fn decode_event(data: &str) -> Result<ChunkEvent> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(ChunkEvent::Skip);
    }
    if data == DONE_MARKER {
        return Ok(ChunkEvent::Done);
    }

    let value: serde_json::Value = serde_json::from_str(data).map_err(|e| {
        RelayError::translation(format!("Malformed stream chunk: {}", e))
    })?;

    // `"error": null` rides along on ordinary chunks from some gateways.
    if value.get("error").is_some_and(|e| !e.is_null()) {
        let message = serde_json::from_value::<ChatErrorResponse>(value)
            .map(|err| err.error.message)
            .unwrap_or_else(|_| "unrecognised error event".to_string());
        return Err(RelayError::provider(message));
    }

    let chunk: ChatCompletionChunk = serde_json::from_value(value).map_err(|e| {
        RelayError::translation(format!("Malformed stream chunk: {}", e))
    })?;

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|text| !text.is_empty())
        .map_or(ChunkEvent::Skip, ChunkEvent::Fragment))
}

/// Turn a raw SSE byte stream into text fragments. The first error ends the
/// stream after being yielded.
pub fn text_fragments<S, E>(byte_stream: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let events = byte_stream.eventsource();
        tokio::pin!(events);

        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    yield Err(RelayError::provider(format!("Stream interrupted: {}", e)));
                    return;
                }
            };

            match decode_event(&event.data) {
                Ok(ChunkEvent::Fragment(text)) => yield Ok(text),
                Ok(ChunkEvent::Skip) => {}
                Ok(ChunkEvent::Done) => return,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn sse(body: &str) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + 'static {
        stream::iter(vec![Ok(Bytes::from(body.to_string()))])
    }

    #[test]
    fn test_decode_text_chunk() {
        let data = r#"{"id":"c1","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        assert_eq!(decode_event(data).unwrap(), ChunkEvent::Fragment("Hel".to_string()));
    }

    #[test]
    fn test_decode_skips_empty_units() {
        let role_only = r#"{"id":"c1","choices":[{"index":0,"delta":{"role":"assistant","content":""}}]}"#;
        let finish = r#"{"id":"c1","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#;
        let usage = r#"{"id":"c1","choices":[],"x_groq":{"usage":{"total_tokens":3}}}"#;

        assert_eq!(decode_event(role_only).unwrap(), ChunkEvent::Skip);
        assert_eq!(decode_event(finish).unwrap(), ChunkEvent::Skip);
        assert_eq!(decode_event(usage).unwrap(), ChunkEvent::Skip);
        assert_eq!(decode_event("").unwrap(), ChunkEvent::Skip);
        assert_eq!(decode_event("[DONE]").unwrap(), ChunkEvent::Done);
    }

    #[test]
    fn test_decode_errors() {
        assert!(decode_event("{not json").is_err());

        let err = decode_event(r#"{"error":{"message":"rate limited","type":"tokens"}}"#).unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn test_null_error_field_is_not_an_error() {
        let data = r#"{"choices":[{"index":0,"delta":{"content":"Hi"}}],"error":null}"#;
        assert_eq!(decode_event(data).unwrap(), ChunkEvent::Fragment("Hi".to_string()));
    }

    #[tokio::test]
    async fn test_fragments_concatenate_in_order() {
        let body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        );

        let fragments: Vec<String> = text_fragments(sse(body))
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(fragments, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_events_split_across_byte_chunks() {
        let parts = vec![
            Ok::<_, std::io::Error>(Bytes::from("data: {\"choices\":[{\"delta\":{\"con")),
            Ok(Bytes::from("tent\":\"Hi\"}}]}\n")),
            Ok(Bytes::from("\ndata: [DONE]\n\n")),
        ];

        let fragments: Vec<String> = text_fragments(stream::iter(parts))
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(fragments, vec!["Hi"]);
    }

    #[tokio::test]
    async fn test_malformed_chunk_ends_stream_with_error() {
        let body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ok\"}}]}\n\n",
            "data: {broken\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"never\"}}]}\n\n",
        );

        let items: Vec<Result<String>> = text_fragments(sse(body)).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "ok");
        assert!(items[1].is_err());
    }
}
