//! Outbound email transport.
//!
//! Sends a single email through a Postmark-style HTTP API. Threading headers
//! (`In-Reply-To`, `References`) are carried in the message's `Headers`
//! array; the caller owns their construction and this module never edits
//! them.
//!
//! Configuration:
//! - `POSTMARK_SERVER_TOKEN`: server API token
//! - `POSTMARK_API_URL`: API base URL (default: `https://api.postmarkapp.com`)

use std::env;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

const DEFAULT_API_URL: &str = "https://api.postmarkapp.com";
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum SendEmailError {
    #[error("POSTMARK_SERVER_TOKEN not set")]
    MissingToken,
    #[error("send request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("send API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("send API rejected message (code {code}): {message}")]
    Rejected { code: i64, message: String },
}

#[derive(Debug, Clone)]
pub struct SendEmailParams {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SendEmailConfig {
    pub api_url: String,
    pub server_token: Option<String>,
}

impl SendEmailConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            api_url: env::var("POSTMARK_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            server_token: env::var("POSTMARK_SERVER_TOKEN")
                .ok()
                .filter(|value| !value.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailSender {
    config: SendEmailConfig,
    client: Client,
}

impl EmailSender {
    pub fn new(config: SendEmailConfig) -> Self {
        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { config, client }
    }

    pub fn from_env() -> Self {
        Self::new(SendEmailConfig::from_env())
    }

    pub fn send(&self, params: &SendEmailParams) -> Result<(), SendEmailError> {
        let token = self
            .config
            .server_token
            .as_deref()
            .ok_or(SendEmailError::MissingToken)?;
        let url = format!("{}/email", self.config.api_url);

        let mut headers = Vec::new();
        if let Some(in_reply_to) = params.in_reply_to.as_deref() {
            headers.push(OutboundHeader {
                name: "In-Reply-To".to_string(),
                value: in_reply_to.to_string(),
            });
        }
        if !params.references.is_empty() {
            headers.push(OutboundHeader {
                name: "References".to_string(),
                value: params.references.join(" "),
            });
        }

        let message = OutboundMessage {
            from: params.from.clone(),
            to: params.to.clone(),
            subject: params.subject.clone(),
            text_body: params.text_body.clone(),
            headers,
        };

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .header("X-Postmark-Server-Token", token)
            .json(&message)
            .send()?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(SendEmailError::Api { status, body });
        }

        let outcome: SendOutcome = response.json()?;
        if outcome.error_code != 0 {
            return Err(SendEmailError::Rejected {
                code: outcome.error_code,
                message: outcome.message.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct OutboundMessage {
    #[serde(rename = "From")]
    from: String,
    #[serde(rename = "To")]
    to: String,
    #[serde(rename = "Subject")]
    subject: String,
    #[serde(rename = "TextBody")]
    text_body: String,
    #[serde(rename = "Headers", skip_serializing_if = "Vec::is_empty")]
    headers: Vec<OutboundHeader>,
}

#[derive(Debug, Serialize)]
struct OutboundHeader {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Debug, Deserialize)]
struct SendOutcome {
    #[serde(rename = "ErrorCode", default)]
    error_code: i64,
    #[serde(rename = "Message", default)]
    message: Option<String>,
}
