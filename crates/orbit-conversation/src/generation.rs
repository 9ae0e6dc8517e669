use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use orbit_gateway::Dispatcher;
use orbit_types::api::{GeneratePromptRequest, GeneratePromptResponse, HistoryEntry};
use orbit_types::events::{MessageDelta, SocketEvent};

/// What the conversation service hands to the generation backend.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub history: Vec<HistoryEntry>,
    /// Id of the placeholder message; streamed tokens are tagged with it.
    pub correlation_id: String,
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("Request failed with status code {status}")]
    Status { status: u16, body: String },

    #[error("generation backend returned an empty reply")]
    Empty,

    #[error("generation backend is not configured")]
    Unconfigured,

    #[error("{0}")]
    Backend(String),
}

impl GenerationError {
    /// Text safe to show the user, if this failure has one.
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Unconfigured | Self::Empty => None,
            other => Some(other.to_string()),
        }
    }
}

/// The language-model backend: prompt + history in, text out.
///
/// Implementations that can stream push deltas into `tokens` as they arrive
/// and still return the full text at the end.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        request: GenerationRequest,
        tokens: &TokenSink,
    ) -> Result<String, GenerationError>;
}

/// Forwards token deltas for one placeholder message to the user's gateway connections.
#[derive(Clone)]
pub struct TokenSink {
    dispatcher: Option<Dispatcher>,
    user_id: Uuid,
    chat_id: Uuid,
    message_id: String,
}

impl TokenSink {
    pub fn new(dispatcher: Dispatcher, user_id: Uuid, chat_id: Uuid, message_id: String) -> Self {
        Self {
            dispatcher: Some(dispatcher),
            user_id,
            chat_id,
            message_id,
        }
    }

    /// A sink that drops everything.
    pub fn discard() -> Self {
        Self {
            dispatcher: None,
            user_id: Uuid::nil(),
            chat_id: Uuid::nil(),
            message_id: String::new(),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub async fn push(&self, delta: &str) {
        let Some(dispatcher) = &self.dispatcher else {
            return;
        };
        if delta.is_empty() {
            return;
        }
        let event = SocketEvent::UpdateMessage(MessageDelta {
            id: self.message_id.clone(),
            chat_id: self.chat_id,
            content: delta.to_string(),
        });
        dispatcher.notify(self.user_id, event).await;
    }
}

/// Generation backend reached over HTTP.
///
/// A `text/event-stream` reply is read as a token stream (each `data:` line
/// is one delta, `[DONE]` ends it); anything else must be `{"message": ...}`.
pub struct HttpGenerator {
    client: reqwest::Client,
    url: Option<String>,
    api_key: String,
}

impl HttpGenerator {
    pub fn new(url: Option<String>, api_key: String, timeout: Duration) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            api_key,
        })
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(
        &self,
        request: GenerationRequest,
        tokens: &TokenSink,
    ) -> Result<String, GenerationError> {
        let url = self.url.as_deref().ok_or(GenerationError::Unconfigured)?;

        let body = GeneratePromptRequest {
            prompt: request.prompt,
            api_key: self.api_key.clone(),
            history: request.history,
            message_id: request.correlation_id,
            chat_id: request.chat_id.to_string(),
            user_id: request.user_id.to_string(),
            username: request.username,
        };

        let response = self
            .client
            .post(url)
            .header(ACCEPT, "text/event-stream, application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let streaming = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let text = if streaming {
            let mut stream = response.bytes_stream();
            let mut decoder = EventStreamDecoder::default();
            let mut text = String::new();
            'read: while let Some(chunk) = stream.next().await {
                for item in decoder.feed(&chunk?) {
                    match item {
                        StreamItem::Delta(delta) => {
                            tokens.push(&delta).await;
                            text.push_str(&delta);
                        }
                        StreamItem::Done => break 'read,
                    }
                }
            }
            debug!("streamed {} chars for {}", text.len(), tokens.message_id());
            text
        } else {
            response.json::<GeneratePromptResponse>().await?.message
        };

        if text.is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(text)
    }
}

#[derive(Debug, PartialEq)]
pub enum StreamItem {
    Delta(String),
    Done,
}

/// Incremental `text/event-stream` reader. Chunks may split lines and
/// multi-byte characters anywhere; only complete lines are decoded.
#[derive(Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
}

impl EventStreamDecoder {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamItem> {
        self.buffer.extend_from_slice(chunk);
        let mut items = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);

            let Some(data) = line.strip_prefix("data:") else {
                // blank separators, comments, event/id fields
                continue;
            };
            let data = data.strip_prefix(' ').unwrap_or(data);

            if data == "[DONE]" {
                items.push(StreamItem::Done);
                continue;
            }
            items.push(StreamItem::Delta(decode_delta(data)));
        }

        items
    }
}

/// `{"content": "..."}` payloads carry deltas that contain newlines; bare text is taken as-is.
fn decode_delta(data: &str) -> String {
    serde_json::from_str::<serde_json::Value>(data)
        .ok()
        .and_then(|v| v.get("content").and_then(|c| c.as_str()).map(str::to_string))
        .unwrap_or_else(|| data.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_split_lines() {
        let mut decoder = EventStreamDecoder::default();
        assert!(decoder.feed(b"data: Hel").is_empty());
        assert_eq!(
            decoder.feed(b"lo\n\ndata: {\"content\":\" wor\\nld\"}\n\n"),
            vec![
                StreamItem::Delta("Hello".into()),
                StreamItem::Delta(" wor\nld".into()),
            ]
        );
        assert_eq!(decoder.feed(b": keep-alive\ndata: [DONE]\n"), vec![StreamItem::Done]);
    }

    #[test]
    fn decoder_handles_split_utf8() {
        let mut decoder = EventStreamDecoder::default();
        let line = "data: caf\u{e9}\n".as_bytes();
        let (head, tail) = line.split_at(line.len() - 2);
        assert!(decoder.feed(head).is_empty());
        assert_eq!(decoder.feed(tail), vec![StreamItem::Delta("caf\u{e9}".into())]);
    }

    #[test]
    fn reasons_are_only_given_when_meaningful() {
        assert_eq!(GenerationError::Unconfigured.reason(), None);
        let status = GenerationError::Status {
            status: 502,
            body: String::new(),
        };
        assert_eq!(
            status.reason().as_deref(),
            Some("Request failed with status code 502")
        );
    }

    #[tokio::test]
    async fn unconfigured_backend_fails_without_a_request() {
        let generator = HttpGenerator::new(None, String::new(), Duration::from_secs(1)).unwrap();
        let request = GenerationRequest {
            prompt: "hi".into(),
            history: vec![],
            correlation_id: "m".into(),
            chat_id: Uuid::nil(),
            user_id: Uuid::nil(),
            username: "ada".into(),
        };
        let err = generator.generate(request, &TokenSink::discard()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Unconfigured));
    }
}
