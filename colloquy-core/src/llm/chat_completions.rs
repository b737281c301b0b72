//! Shared client for OpenAI-compatible `/chat/completions` endpoints
//!
//! Groq and OpenAI speak the same wire format, so both providers delegate
//! request building, error mapping and SSE decoding to this client.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;

use crate::error::{ColloquyError, Result};
use crate::llm::{LLMRequest, LLMResponse, Message, TextStream, TokenUsage};

pub(crate) struct ChatCompletionsClient {
    client: reqwest::Client,
    provider: &'static str,
    api_key: String,
    model: String,
    base_url: String,
}

impl ChatCompletionsClient {
    pub(crate) fn new(
        provider: &'static str,
        api_key: String,
        model: String,
        base_url: String,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            ColloquyError::Configuration(format!("Failed to build {} HTTP client: {}", provider, e))
        })?;

        Ok(Self {
            client,
            provider,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub(crate) fn model(&self) -> &str {
        &self.model
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    fn wire_request(&self, request: &LLMRequest, stream: bool) -> WireRequest {
        WireRequest {
            model: self.model.clone(),
            messages: convert_messages(&request.messages),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stop: if request.stop_sequences.is_empty() {
                None
            } else {
                Some(request.stop_sequences.clone())
            },
            stream,
        }
    }

    async fn send(&self, body: &WireRequest) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ColloquyError::Generation(format!("{} request timed out: {}", self.provider, e))
                } else {
                    ColloquyError::Generation(format!(
                        "Failed to send request to {}: {}",
                        self.provider, e
                    ))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            if let Ok(error) = serde_json::from_str::<WireError>(&text) {
                return Err(ColloquyError::Generation(format!(
                    "{} API error ({}): {}",
                    self.provider,
                    error.error.error_type.unwrap_or_else(|| status.to_string()),
                    error.error.message
                )));
            }

            return Err(ColloquyError::Generation(format!(
                "{} API error ({}): {}",
                self.provider, status, text
            )));
        }

        Ok(response)
    }

    pub(crate) async fn complete(&self, request: &LLMRequest) -> Result<LLMResponse> {
        let response = self.send(&self.wire_request(request, false)).await?;

        let wire: WireResponse = response.json().await.map_err(|e| {
            ColloquyError::Generation(format!("Failed to parse {} response: {}", self.provider, e))
        })?;

        let Some(choice) = wire.choices.into_iter().next() else {
            return Err(ColloquyError::Generation(format!(
                "{} API returned no choices",
                self.provider
            )));
        };

        let content = choice
            .message
            .and_then(|m| m.content)
            .unwrap_or_default();

        let usage = wire.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(LLMResponse { content, usage })
    }

    pub(crate) async fn stream(&self, request: &LLMRequest) -> Result<TextStream> {
        let response = self.send(&self.wire_request(request, true)).await?;

        // Convert response bytes to a stream of lines
        let bytes_stream = response.bytes_stream();
        let reader = tokio_util::io::StreamReader::new(
            bytes_stream.map(|r| r.map_err(std::io::Error::other)),
        );
        let lines = tokio::io::BufReader::new(reader).lines();
        let lines_stream = LinesStream::new(lines);

        let provider = self.provider;
        let stream = lines_stream.filter_map(move |line_result| match line_result {
            Ok(line) => parse_sse_line(&line).transpose(),
            Err(e) => Some(Err(ColloquyError::Generation(format!(
                "{} stream read error: {}",
                provider, e
            )))),
        });

        Ok(Box::pin(stream))
    }
}

/// Decode one SSE line into a content fragment.
///
/// Returns `Ok(None)` for keep-alives, empty deltas and the `[DONE]` marker.
fn parse_sse_line(line: &str) -> Result<Option<String>> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(None);
    }

    let chunk: WireStreamChunk = serde_json::from_str(data).map_err(|e| {
        ColloquyError::Generation(format!("Failed to parse stream chunk: {}", e))
    })?;

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|content| !content.is_empty()))
}

fn convert_messages(messages: &[Message]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|m| WireMessage {
            role: m.role().as_str().to_string(),
            content: m.content().to_string(),
        })
        .collect()
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: Option<WireMessageResponse>,
    delta: Option<WireDelta>,
}

#[derive(Deserialize)]
struct WireMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

#[derive(Deserialize)]
struct WireStreamChunk {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireError {
    error: WireErrorDetail,
}

#[derive(Deserialize)]
struct WireErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}
