//! Text providers: the only way this crate talks to a language model.
//!
//! Each provider turns a `GenerationRequest` into raw text. Parsing, novelty
//! and failover all happen above this seam, so a provider knows nothing about
//! devotionals.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod chain;
pub mod http;
pub mod retry;

/// Wire dialect spoken by a provider endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// `/chat/completions` shape (OpenAI, Groq, DeepSeek, and compatibles).
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            other => Err(format!("unknown provider kind '{other}' (expected openai|anthropic)")),
        }
    }
}

/// A configured provider. Providers are data; adding one is a config change.
#[derive(Clone, PartialEq)]
pub struct ProviderDescriptor {
    pub name: String,
    pub kind: ProviderKind,
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
}

// Keeps API keys out of logs and panic messages.
impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("provider returned an empty response")]
    EmptyResponse,

    #[error("unusable output: {0}")]
    Unusable(String),
}

impl ProviderError {
    /// Transient failures are worth retrying against the same provider.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout(_) => true,
            ProviderError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

#[async_trait]
pub trait TextProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError>;
}
