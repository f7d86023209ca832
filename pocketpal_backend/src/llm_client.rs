use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::{self, AbortHandle, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::CompletionSettings;
use crate::message::Role;
use crate::sse::DeltaDecoder;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const COMPLETIONS_PATH: &str = "/chat/completions";
const VERSION_SEGMENT: &str = "/v1";

/// Failures of a completion attempt. `Display` is what the user sees.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    #[error("API Key Missing")]
    MissingApiKey,
    #[error("{status} {reason}")]
    Http { status: u16, reason: String },
    #[error("{0}")]
    Transport(String),
    #[error("Cannot read response body")]
    MissingBody,
}

impl CompletionError {
    /// Credential problems are configuration errors; everything else is transport.
    pub fn is_configuration(&self) -> bool {
        matches!(self, CompletionError::MissingApiKey)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: &'a [ChatMessage],
}

/// Lazy, finite, single-use sequence of text deltas.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

/// Pick the completions URL for a configured base.
///
/// Only suffixes are inspected: a base that merely contains the completions
/// path somewhere in the middle still gets the version + completions suffix.
pub fn resolve_completions_url(base: Option<&str>) -> String {
    let base = base
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .unwrap_or(DEFAULT_API_BASE)
        .trim_end_matches('/');

    if base.ends_with(COMPLETIONS_PATH) {
        base.to_string()
    } else if base.ends_with(VERSION_SEGMENT) {
        format!("{}{}", base, COMPLETIONS_PATH)
    } else {
        format!("{}{}{}", base, VERSION_SEGMENT, COMPLETIONS_PATH)
    }
}

/// Source of streamed completions; the seam between a turn and the network.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn stream_chat(
        &self,
        settings: &CompletionSettings,
        messages: Vec<ChatMessage>,
    ) -> Result<DeltaStream, CompletionError>;
}

#[derive(Clone)]
pub struct LlmClient {
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Same as `stream_chat`, plus a handle that stops the stream early.
    pub async fn stream_chat_abortable(
        &self,
        settings: &CompletionSettings,
        messages: Vec<ChatMessage>,
    ) -> Result<(DeltaStream, AbortHandle), CompletionError> {
        let deltas = self.stream_chat(settings, messages).await?;
        let (abortable, handle) = stream::abortable(deltas);
        Ok((Box::pin(abortable), handle))
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn stream_chat(
        &self,
        settings: &CompletionSettings,
        messages: Vec<ChatMessage>,
    ) -> Result<DeltaStream, CompletionError> {
        let api_key = settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(CompletionError::MissingApiKey)?;

        let url = resolve_completions_url(settings.api_url.as_deref());
        let request = ChatCompletionRequest {
            model: &settings.model,
            stream: true,
            messages: &messages,
        };

        tracing::info!(
            "LLM stream request to {} model={} messages={}",
            url,
            settings.model,
            messages.len()
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("Request failed").to_string();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                "LLM API returned error {}: {}",
                status,
                body.chars().take(500).collect::<String>()
            );
            return Err(CompletionError::Http {
                status: status.as_u16(),
                reason,
            });
        }

        // 204/205 promise an empty body, so there is nothing to stream.
        if status == reqwest::StatusCode::NO_CONTENT || status == reqwest::StatusCode::RESET_CONTENT {
            return Err(CompletionError::MissingBody);
        }

        Ok(delta_stream(response.bytes_stream()))
    }
}

struct DeltaState<S> {
    body: Pin<Box<S>>,
    decoder: DeltaDecoder,
    ready: VecDeque<String>,
    finished: bool,
}

/// Turn a raw body stream into text deltas. A read error ends the stream
/// after being yielded once.
pub fn delta_stream<S, B, E>(body: S) -> DeltaStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DeltaState {
        body: Box::pin(body),
        decoder: DeltaDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(delta) = state.ready.pop_front() {
                return Some((Ok(delta), state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let deltas = state.decoder.push(chunk.as_ref());
                    state.ready.extend(deltas);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    let error = CompletionError::Transport(format!("Stream read error: {}", e));
                    return Some((Err(error), state));
                }
                None => {
                    state.finished = true;
                    state.ready.extend(state.decoder.finish());
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sse_event, HttpStub};
    use axum::http::{Method, StatusCode};

    #[test]
    fn resolves_completion_urls() {
        assert_eq!(
            resolve_completions_url(None),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            resolve_completions_url(Some("  ")),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            resolve_completions_url(Some("https://proxy.example.com/v1/chat/completions///")),
            "https://proxy.example.com/v1/chat/completions"
        );
        assert_eq!(
            resolve_completions_url(Some("https://proxy.example.com/v1/")),
            "https://proxy.example.com/v1/chat/completions"
        );
        assert_eq!(
            resolve_completions_url(Some("https://proxy.example.com")),
            "https://proxy.example.com/v1/chat/completions"
        );
        // only a suffix match counts
        assert_eq!(
            resolve_completions_url(Some("https://proxy.example.com/chat/completions/openai")),
            "https://proxy.example.com/chat/completions/openai/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn delta_stream_yields_then_stops_after_read_error() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(sse_event("a").into_bytes()),
            Err("connection reset".to_string()),
            Ok(sse_event("never").into_bytes()),
        ];
        let items: Vec<_> = delta_stream(stream::iter(chunks)).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok("a".to_string()));
        assert!(matches!(&items[1], Err(CompletionError::Transport(msg)) if msg.contains("connection reset")));
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let client = LlmClient::new(reqwest::Client::new());
        let settings = CompletionSettings::new(Some("http://127.0.0.1:9"), None, None);
        let err = client
            .stream_chat(&settings, vec![ChatMessage::new(Role::User, "hi")])
            .await
            .err()
            .expect("missing key error");
        assert_eq!(err, CompletionError::MissingApiKey);
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn streams_deltas_from_server() {
        let mut body = sse_event("Hello ");
        body.push_str(": ping\n\n");
        body.push_str(&sse_event("||World"));
        body.push_str("data: [DONE]\n\n");
        let stub = HttpStub::serve(StatusCode::OK, "text/event-stream", body).await;

        let client = LlmClient::new(reqwest::Client::new());
        let settings = CompletionSettings::new(Some(&stub.base_url()), Some("sk-test"), Some("mo-1"));
        let deltas: Vec<String> = client
            .stream_chat(&settings, vec![ChatMessage::new(Role::User, "hi")])
            .await
            .expect("stream")
            .map(|d| d.expect("delta"))
            .collect()
            .await;
        assert_eq!(deltas.concat(), "Hello ||World");

        let request = stub.request().await;
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.path, "/v1/chat/completions");
        assert_eq!(request.header("authorization"), Some("Bearer sk-test"));
        let json: serde_json::Value = serde_json::from_str(&request.body).expect("json body");
        assert_eq!(json["model"], "mo-1");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn non_success_status_is_http_error() {
        let stub = HttpStub::serve(StatusCode::UNAUTHORIZED, "application/json", "{}").await;
        let client = LlmClient::new(reqwest::Client::new());
        let settings = CompletionSettings::new(Some(&stub.base_url()), Some("bad"), None);
        let err = client
            .stream_chat(&settings, Vec::new())
            .await
            .err()
            .expect("http error");
        assert_eq!(
            err,
            CompletionError::Http {
                status: 401,
                reason: "Unauthorized".to_string()
            }
        );
        assert!(!err.is_configuration());
        assert_eq!(err.to_string(), "401 Unauthorized");
    }

    #[tokio::test]
    async fn abort_handle_ends_stream() {
        let stub = HttpStub::serve(StatusCode::OK, "text/event-stream", sse_event("x")).await;
        let client = LlmClient::new(reqwest::Client::new());
        let settings = CompletionSettings::new(Some(&stub.base_url()), Some("k"), None);
        let (mut deltas, handle) = client
            .stream_chat_abortable(&settings, Vec::new())
            .await
            .expect("stream");
        handle.abort();
        assert!(deltas.next().await.is_none());
    }
}
