use std::future::Future;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use reqwest::Client;
use tracing::debug;

use crate::api_types::{
    ApiError, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, WireMessage,
};
use crate::config::CompletionConfig;
use crate::error::AiError;

/// Lazy, finite sequence of cumulative reply texts. Each item is the whole
/// reply so far, not a delta. Dropping it cancels the request.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Result<String, AiError>> + Send + 'static>>;

/// An ordered message history plus the model to run it through.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<WireMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Something that turns a message history into a reply.
pub trait ChatCompleter: Send + Sync {
    /// Produce the full reply in one call.
    fn complete(
        &self,
        request: CompletionRequest,
    ) -> impl Future<Output = Result<String, AiError>> + Send;

    /// Produce the reply incrementally as cumulative snapshots.
    fn complete_streaming(&self, request: CompletionRequest) -> SnapshotStream;
}

/// HTTP client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct CompletionClient {
    http: Client,
    config: CompletionConfig,
}

impl CompletionClient {
    pub fn new(config: CompletionConfig) -> Result<Self, AiError> {
        let http = Client::builder()
            .build()
            .map_err(|e| AiError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'))
    }
}

impl ChatCompleter for CompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, AiError> {
        let body = ChatCompletionRequest {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            stream: false,
        };

        let response = self
            .http
            .post(self.endpoint())
            .timeout(self.config.timeout)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::completion(format!("Failed to send request: {}", e)))?;
        let response = check_status(response).await?;

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AiError::completion(format!("Failed to parse response: {}", e)))?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AiError::completion("response contained no content"))?;

        debug!("Completion from {} returned {} chars", request.model, text.len());
        Ok(text)
    }

    fn complete_streaming(&self, request: CompletionRequest) -> SnapshotStream {
        let http = self.http.clone();
        let url = self.endpoint();
        let api_key = self.config.api_key.clone();

        Box::pin(async_stream::try_stream! {
            let body = ChatCompletionRequest {
                model: &request.model,
                messages: &request.messages,
                max_tokens: request.max_tokens,
                stream: true,
            };

            let response = http
                .post(&url)
                .bearer_auth(&api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| AiError::completion(format!("Failed to send request: {}", e)))?;
            let response = check_status(response).await?;

            let mut body = response.bytes_stream();
            let mut buf: Vec<u8> = Vec::new();
            let mut text = String::new();
            let mut done = false;

            'read: while let Some(chunk) = body.next().await {
                let chunk = chunk
                    .map_err(|e| AiError::completion(format!("stream interrupted: {}", e)))?;
                buf.extend_from_slice(&chunk);

                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);

                    match parse_sse_line(line.trim_end())? {
                        SseLine::Delta(delta) => {
                            text.push_str(&delta);
                            yield text.clone();
                        }
                        SseLine::Done => {
                            done = true;
                            break 'read;
                        }
                        SseLine::Skip => {}
                    }
                }
            }

            // Last line may arrive without its newline
            if !done && !buf.is_empty() {
                let line = String::from_utf8_lossy(&buf).into_owned();
                match parse_sse_line(line.trim_end())? {
                    SseLine::Delta(delta) => {
                        text.push_str(&delta);
                        yield text.clone();
                    }
                    SseLine::Done => done = true,
                    SseLine::Skip => {}
                }
            }

            if !done {
                Err::<(), _>(AiError::completion("stream closed before [DONE]"))?;
            }

            if text.is_empty() {
                Err::<(), _>(AiError::completion("stream ended without content"))?;
            }
            debug!("Streamed completion from {} finished with {} chars", request.model, text.len());
        })
    }
}

/// Turn non-2xx responses into `CompletionFailed`, keeping the API's message when present.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiError>(&error_text)
        .map(|e| e.error.message)
        .unwrap_or(error_text);

    Err(AiError::completion(format!("API error ({}): {}", status.as_u16(), message)))
}

#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine, AiError> {
    let Some(data) = line.strip_prefix("data:") else {
        // Blank separators, comments, `event:` and `id:` fields
        return Ok(SseLine::Skip);
    };
    let data = data.trim_start();

    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(data)
        .map_err(|e| AiError::completion(format!("malformed stream chunk: {}", e)))?;

    if let Some(err) = chunk.error {
        return Err(AiError::completion(err.message));
    }

    let delta = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .unwrap_or_default();

    Ok(if delta.is_empty() {
        SseLine::Skip
    } else {
        SseLine::Delta(delta)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::post};
    use serde_json::{Value, json};

    #[test]
    fn parses_sse_lines() {
        assert_eq!(parse_sse_line("").unwrap(), SseLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseLine::Skip);
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseLine::Done);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap(),
            SseLine::Delta("Hi".into())
        );
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            SseLine::Skip
        );
        assert!(parse_sse_line("data: {not json").is_err());
        assert!(parse_sse_line(r#"data: {"error":{"message":"overloaded"}}"#).is_err());
    }

    async fn fake_completions(Json(body): Json<Value>) -> impl IntoResponse {
        let last = body["messages"]
            .as_array()
            .and_then(|m| m.last())
            .and_then(|m| m["content"].as_str())
            .unwrap_or_default()
            .to_string();

        if last == "fail" {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [(axum::http::header::CONTENT_TYPE, "application/json")],
                json!({"error": {"message": "rate limited"}}).to_string(),
            );
        }

        if last == "empty" && body["stream"].as_bool() != Some(true) {
            return (
                StatusCode::OK,
                [(axum::http::header::CONTENT_TYPE, "application/json")],
                json!({"choices": [{"message": {"role": "assistant", "content": ""}}]}).to_string(),
            );
        }

        if body["stream"].as_bool() == Some(true) {
            let mut sse = String::new();
            sse.push_str("data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n");
            for piece in ["Hel", "lo ", "th", "ere"] {
                sse.push_str(&format!(
                    "data: {}\n\n",
                    json!({"choices": [{"delta": {"content": piece}}]})
                ));
            }
            if last == "cut" {
                sse.push_str("data: {\"error\":{\"message\":\"upstream reset\"}}\n\n");
            }
            match last.as_str() {
                "unterminated" => {}
                "no-newline" => sse.push_str("data: [DONE]"),
                _ => sse.push_str("data: [DONE]\n\n"),
            }
            return (
                StatusCode::OK,
                [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
                sse,
            );
        }

        (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            json!({"choices": [{"message": {"role": "assistant", "content": format!("echo: {last}")}}]})
                .to_string(),
        )
    }

    async fn spawn_fake_api() -> CompletionClient {
        let app = Router::new().route("/v1/chat/completions", post(fake_completions));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        CompletionClient::new(CompletionConfig::new(format!("http://{}/v1", addr), "test-key"))
            .unwrap()
    }

    #[tokio::test]
    async fn complete_returns_reply_text() {
        let client = spawn_fake_api().await;
        let reply = client
            .complete(CompletionRequest::new("gpt-4o-mini", vec![WireMessage::user("ping")]))
            .await
            .unwrap();
        assert_eq!(reply, "echo: ping");
    }

    #[tokio::test]
    async fn complete_surfaces_api_error_message() {
        let client = spawn_fake_api().await;
        let err = client
            .complete(CompletionRequest::new("gpt-4o-mini", vec![WireMessage::user("fail")]))
            .await
            .unwrap_err();
        match err {
            AiError::CompletionFailed { cause } => {
                assert!(cause.contains("429"));
                assert!(cause.contains("rate limited"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn streaming_yields_cumulative_snapshots() {
        let client = spawn_fake_api().await;
        let snapshots: Vec<String> = client
            .complete_streaming(CompletionRequest::new(
                "gpt-4o-mini",
                vec![WireMessage::user("hi")],
            ))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(snapshots, vec!["Hel", "Hello ", "Hello th", "Hello there"]);
    }

    #[tokio::test]
    async fn streaming_can_stop_early() {
        let client = spawn_fake_api().await;
        let mut stream = client.complete_streaming(CompletionRequest::new(
            "gpt-4o-mini",
            vec![WireMessage::user("hi")],
        ));
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, "Hel");
        drop(stream);
    }

    #[tokio::test]
    async fn streaming_error_terminates_sequence() {
        let client = spawn_fake_api().await;
        let items: Vec<Result<String, AiError>> = client
            .complete_streaming(CompletionRequest::new(
                "gpt-4o-mini",
                vec![WireMessage::user("cut")],
            ))
            .collect()
            .await;
        assert_eq!(items.len(), 5);
        assert!(items[..4].iter().all(|r| r.is_ok()));
        assert!(matches!(items[4], Err(AiError::CompletionFailed { .. })));
    }

    #[tokio::test]
    async fn streaming_http_error_is_completion_failure() {
        let client = spawn_fake_api().await;
        let items: Vec<Result<String, AiError>> = client
            .complete_streaming(CompletionRequest::new(
                "gpt-4o-mini",
                vec![WireMessage::user("fail")],
            ))
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(AiError::CompletionFailed { .. })));
    }

    #[tokio::test]
    async fn empty_content_is_completion_failure() {
        let client = spawn_fake_api().await;
        let err = client
            .complete(CompletionRequest::new("gpt-4o-mini", vec![WireMessage::user("empty")]))
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::CompletionFailed { .. }));
    }

    #[tokio::test]
    async fn streaming_without_done_marker_fails() {
        let client = spawn_fake_api().await;
        let items: Vec<Result<String, AiError>> = client
            .complete_streaming(CompletionRequest::new(
                "gpt-4o-mini",
                vec![WireMessage::user("unterminated")],
            ))
            .collect()
            .await;
        assert_eq!(items.len(), 5);
        assert!(matches!(items[4], Err(AiError::CompletionFailed { .. })));
    }

    #[tokio::test]
    async fn streaming_accepts_done_marker_without_newline() {
        let client = spawn_fake_api().await;
        let items: Vec<Result<String, AiError>> = client
            .complete_streaming(CompletionRequest::new(
                "gpt-4o-mini",
                vec![WireMessage::user("no-newline")],
            ))
            .collect()
            .await;
        assert_eq!(items.len(), 4);
        assert_eq!(items[3].as_deref().unwrap(), "Hello there");
    }
}
