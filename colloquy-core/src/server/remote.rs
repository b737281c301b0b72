//! Client for a remote chain server

use serde::Deserialize;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;

use super::{ChainInput, InvokeRequest, InvokeResponse};
use crate::error::{ColloquyError, Result};
use crate::llm::TextStream;

/// Calls `/invoke` and `/stream` on a chain served by [`serve`](super::serve).
///
/// `base_url` is the chain's path, e.g. `http://localhost:8000/chain/`.
#[derive(Debug, Clone)]
pub struct RemoteChain {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl RemoteChain {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, None)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            ColloquyError::Configuration(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, endpoint: &str, request: &InvokeRequest) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self.client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.error)
                .unwrap_or(text);
            return Err(ColloquyError::Generation(format!(
                "remote chain error ({}): {}",
                status, message
            )));
        }

        Ok(response)
    }

    /// Invoke the remote chain and return its output.
    pub async fn invoke(&self, input: ChainInput, session_id: Option<&str>) -> Result<String> {
        let request = InvokeRequest::new(input, session_id.map(str::to_string));
        let response: InvokeResponse = self
            .post("invoke", &request)
            .await?
            .json()
            .await
            .map_err(|e| ColloquyError::Generation(format!("Invalid remote response: {}", e)))?;

        tracing::debug!(run_id = %response.metadata.run_id, "Remote chain invoked");
        Ok(response.output)
    }

    /// Stream the remote chain's output fragments.
    pub async fn stream(&self, input: ChainInput, session_id: Option<&str>) -> Result<TextStream> {
        let request = InvokeRequest::new(input, session_id.map(str::to_string));
        let response = self.post("stream", &request).await?;

        let reader = tokio_util::io::StreamReader::new(
            response
                .bytes_stream()
                .map(|r| r.map_err(std::io::Error::other)),
        );
        let lines = LinesStream::new(tokio::io::BufReader::new(reader).lines());

        let mut decoder = SseDecoder::default();
        let stream = lines
            .map(move |line| match line {
                Ok(line) => decoder.push_line(&line),
                Err(e) => Some(Err(ColloquyError::Generation(format!(
                    "remote stream read error: {}",
                    e
                )))),
            })
            .take_while(|event| event.is_some())
            .filter_map(|event| match event {
                Some(Ok(SseItem::Data(text))) => Some(Ok(text)),
                Some(Ok(SseItem::Skip)) | None => None,
                Some(Err(e)) => Some(Err(e)),
            });

        Ok(Box::pin(stream))
    }
}

#[derive(Debug, PartialEq)]
enum SseItem {
    Data(String),
    Skip,
}

/// Decodes the server's `event:`/`data:` pairs.
///
/// `push_line` returns `None` once the `end` event has been seen.
#[derive(Debug, Default)]
struct SseDecoder {
    event: Option<String>,
}

impl SseDecoder {
    fn push_line(&mut self, line: &str) -> Option<Result<SseItem>> {
        if let Some(event) = line.strip_prefix("event:") {
            let event = event.trim().to_string();
            if event == "end" {
                return None;
            }
            self.event = Some(event);
            return Some(Ok(SseItem::Skip));
        }

        let Some(data) = line.strip_prefix("data:") else {
            return Some(Ok(SseItem::Skip));
        };
        let data = data.trim_start();

        match self.event.take().as_deref() {
            Some("data") => Some(
                serde_json::from_str::<String>(data)
                    .map(SseItem::Data)
                    .map_err(|e| {
                        ColloquyError::Generation(format!("Invalid stream fragment: {}", e))
                    }),
            ),
            Some("error") => {
                let message = serde_json::from_str::<ErrorBody>(data)
                    .map(|body| body.error)
                    .unwrap_or_else(|_| data.to_string());
                Some(Err(ColloquyError::Generation(message)))
            }
            _ => Some(Ok(SseItem::Skip)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_yields_data_fragments() {
        let mut decoder = SseDecoder::default();
        assert_eq!(decoder.push_line("event: metadata").unwrap().unwrap(), SseItem::Skip);
        assert_eq!(
            decoder.push_line(r#"data: {"run_id": "x"}"#).unwrap().unwrap(),
            SseItem::Skip
        );
        assert_eq!(decoder.push_line("").unwrap().unwrap(), SseItem::Skip);
        decoder.push_line("event: data");
        assert_eq!(
            decoder.push_line(r#"data: "ciao""#).unwrap().unwrap(),
            SseItem::Data("ciao".to_string())
        );
        assert!(decoder.push_line("event: end").is_none());
    }

    #[test]
    fn test_decoder_surfaces_errors() {
        let mut decoder = SseDecoder::default();
        decoder.push_line("event: error");
        let err = decoder
            .push_line(r#"data: {"error": "Generation failed: down"}"#)
            .unwrap()
            .unwrap_err();
        assert!(err.is_generation_failure());
        assert!(err.to_string().contains("down"));
    }

    #[test]
    fn test_base_url_is_normalized() {
        let remote = RemoteChain::new("http://localhost:8000/chain/").unwrap();
        assert_eq!(remote.base_url(), "http://localhost:8000/chain");
    }
}
