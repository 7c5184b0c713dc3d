//! Client for the text-generation collaborator.
//!
//! The service hands this module a personalization profile and a context
//! block; the module turns that into a chat request against an
//! OpenAI-compatible endpoint and returns the generated text together with
//! the usage metadata callers report upstream.
//!
//! Configuration:
//! - `GENERATION_API_KEY`: bearer token for the API
//! - `GENERATION_API_URL`: API base URL (default: `https://api.openai.com/v1`)
//! - `GENERATION_MODEL`: model to request (default: `gpt-4o-mini`)
//! - `GENERATION_TIMEOUT_SECS`: per-request timeout (default: 60)

use std::env;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MAX_COMPLETION_TOKENS: u32 = 2048;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("GENERATION_API_KEY not set")]
    MissingApiKey,
    #[error("generation request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("generation API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("generation API returned no choices")]
    EmptyResponse,
}

/// What the caller wants generated.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Personalization profile; sent as the system message.
    pub profile: String,
    /// Task context; sent as the user message.
    pub context: String,
}

/// Generated content plus the usage metadata the API reported.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub content: String,
    pub model: String,
    pub token_count: u32,
    pub completion_time: Duration,
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

impl GenerationConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let timeout = env::var("GENERATION_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Self {
            api_url: env::var("GENERATION_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            api_key: env::var("GENERATION_API_KEY")
                .ok()
                .filter(|value| !value.trim().is_empty()),
            model: env::var("GENERATION_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            timeout: Duration::from_secs(timeout),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationClient {
    config: GenerationConfig,
    client: Client,
}

impl GenerationClient {
    pub fn new(config: GenerationConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { config, client }
    }

    pub fn from_env() -> Self {
        Self::new(GenerationConfig::from_env())
    }

    pub fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, GenerationError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(GenerationError::MissingApiKey)?;
        let url = format!("{}/chat/completions", self.config.api_url);

        let body = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.profile.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.context.clone(),
                },
            ],
            max_completion_tokens: MAX_COMPLETION_TOKENS,
        };

        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(GenerationError::Api { status, body });
        }

        let parsed: ChatResponse = response.json()?;
        let completion_time = started.elapsed();
        let content = parsed
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or(GenerationError::EmptyResponse)?;

        Ok(GenerationOutput {
            content,
            model: parsed.model.unwrap_or_else(|| self.config.model.clone()),
            token_count: parsed
                .usage
                .map(|usage| usage.total_tokens)
                .unwrap_or_default(),
            completion_time,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_completion_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}
