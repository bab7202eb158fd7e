//! HTTP text provider: one configured endpoint speaking either the
//! OpenAI-compatible chat completions dialect or the Anthropic Messages API.
//!
//! Each call is bounded by `tokio::time::timeout`; on expiry the request
//! future is dropped, which cancels the in-flight HTTP request. Retrying is
//! the chain's job, so a single call here makes exactly one request.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GenerationRequest, ProviderDescriptor, ProviderError, ProviderKind, TextProvider};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

/// JSON mode for the chat completions dialect.
#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

/// Both dialects report errors as `{"error": {"message": ...}}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Clone)]
pub struct HttpProvider {
    client: Client,
    descriptor: ProviderDescriptor,
    timeout: Duration,
}

impl HttpProvider {
    pub fn new(descriptor: ProviderDescriptor, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            descriptor,
            timeout,
        })
    }

    async fn send(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        let d = &self.descriptor;
        let builder = match d.kind {
            ProviderKind::OpenAi => self
                .client
                .post(&d.endpoint)
                .bearer_auth(&d.api_key)
                .json(&ChatRequest {
                    model: &d.model,
                    messages: vec![
                        ChatMessage {
                            role: "system",
                            content: &request.system,
                        },
                        ChatMessage {
                            role: "user",
                            content: &request.prompt,
                        },
                    ],
                    temperature: request.temperature,
                    max_tokens: request.max_tokens,
                    response_format: ResponseFormat {
                        kind: "json_object",
                    },
                }),
            ProviderKind::Anthropic => self
                .client
                .post(&d.endpoint)
                .header("x-api-key", &d.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&MessagesRequest {
                    model: &d.model,
                    max_tokens: request.max_tokens,
                    temperature: request.temperature,
                    system: &request.system,
                    messages: vec![ChatMessage {
                        role: "user",
                        content: &request.prompt,
                    }],
                }),
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout)
            } else {
                ProviderError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("failed to read body: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let text = extract_text(d.kind, &body)?;
        debug!(
            "Provider {} returned {} chars (model: {})",
            d.name,
            text.len(),
            d.model
        );
        Ok(text)
    }
}

#[async_trait]
impl TextProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        match tokio::time::timeout(self.timeout, self.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.timeout)),
        }
    }
}

/// Pulls the generated text out of a successful response body.
fn extract_text(kind: ProviderKind, body: &str) -> Result<String, ProviderError> {
    let text = match kind {
        ProviderKind::OpenAi => {
            let parsed: ChatResponse = serde_json::from_str(body)
                .map_err(|e| ProviderError::Unusable(format!("malformed response body: {e}")))?;
            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
        }
        ProviderKind::Anthropic => {
            let parsed: MessagesResponse = serde_json::from_str(body)
                .map_err(|e| ProviderError::Unusable(format!("malformed response body: {e}")))?;
            parsed
                .content
                .into_iter()
                .find(|b| b.block_type == "text")
                .and_then(|b| b.text)
        }
    };

    match text {
        Some(t) if !t.trim().is_empty() => Ok(t),
        _ => Err(ProviderError::EmptyResponse),
    }
}
