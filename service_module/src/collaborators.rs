//! Trait seams for the generation and send collaborators.
//!
//! Both pipelines talk to the collaborators through these traits; the
//! module-backed implementations are the production wiring and tests plug
//! in fakes at the same seam.

use crate::email::OutgoingEmail;
use crate::error::UpstreamError;

#[derive(Debug, Clone)]
pub struct GenerateParams {
    pub profile: String,
    pub context: String,
}

#[derive(Debug, Clone)]
pub struct GeneratedContent {
    pub content: String,
    pub model: String,
    pub token_count: u32,
}

pub trait ContentGenerator: Send + Sync {
    fn generate(&self, params: &GenerateParams) -> Result<GeneratedContent, UpstreamError>;
}

pub trait OutboundSender: Send + Sync {
    fn send(&self, email: &OutgoingEmail) -> Result<(), UpstreamError>;
}

/// Production generator backed by the generation module.
#[derive(Debug, Clone)]
pub struct ModuleGenerator {
    client: generation_module::GenerationClient,
}

impl ModuleGenerator {
    pub fn new(client: generation_module::GenerationClient) -> Self {
        Self { client }
    }

    pub fn from_env() -> Self {
        Self::new(generation_module::GenerationClient::from_env())
    }
}

impl ContentGenerator for ModuleGenerator {
    fn generate(&self, params: &GenerateParams) -> Result<GeneratedContent, UpstreamError> {
        let output = self
            .client
            .generate(&generation_module::GenerationRequest {
                profile: params.profile.clone(),
                context: params.context.clone(),
            })
            .map_err(|err| UpstreamError(err.to_string()))?;
        Ok(GeneratedContent {
            content: output.content,
            model: output.model,
            token_count: output.token_count,
        })
    }
}

/// Production sender backed by the send module.
#[derive(Debug, Clone)]
pub struct ModuleSender {
    sender: send_emails_module::EmailSender,
}

impl ModuleSender {
    pub fn new(sender: send_emails_module::EmailSender) -> Self {
        Self { sender }
    }

    pub fn from_env() -> Self {
        Self::new(send_emails_module::EmailSender::from_env())
    }
}

impl OutboundSender for ModuleSender {
    fn send(&self, email: &OutgoingEmail) -> Result<(), UpstreamError> {
        self.sender
            .send(&send_emails_module::SendEmailParams {
                from: email.from.clone(),
                to: email.to.clone(),
                subject: email.subject.clone(),
                text_body: email.body.clone(),
                in_reply_to: email.in_reply_to.clone(),
                references: email.references.clone(),
            })
            .map_err(|err| UpstreamError(err.to_string()))
    }
}
