//! Inbound webhook processing.
//!
//! The handler computes an [`InboundOutcome`] first and maps it to an HTTP
//! status last, so the provider retry-suppression policy lives in one table
//! ([`outcome_status`]) instead of scattered conditionals.

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::Utc;
use tracing::{info, warn};

use crate::collaborators::{ContentGenerator, GenerateParams, OutboundSender};
use crate::email::IncomingEmail;
use crate::error::ServiceError;
use crate::feedback::normalize_feedback;
use crate::headers::parse_header_blob;
use crate::routing::{extract_addresses, normalize_email, AddressRouter, RecipientRoute, RouteConfig};
use crate::store::{PersonalizationStore, StoreError};
use crate::threading::ThreadFormatter;

/// System profile for the direct Q&A mailbox.
const ASSISTANT_PROFILE: &str = "You are a helpful email assistant. Answer the \
user's email directly and concisely. Plain text only, ready to send as an \
email body. Do not include a subject line or a signature.";

/// Raw multipart fields of one webhook delivery.
#[derive(Debug, Clone, Default)]
pub struct InboundFields {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub text: Option<String>,
    pub headers: Option<String>,
}

/// What processing a delivery amounted to, before any HTTP mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Direct path: a reply was generated and sent.
    ReplySent { to: String, body: String },
    /// Feed path: feedback accepted, audit row appended, prompt merged.
    FeedbackRecorded { user_id: String },
    /// Processed fine, nothing to change; retries must stop.
    NothingToDo { reason: &'static str },
    /// Addressed to a mailbox that is not ours; retries must stop.
    Unrecognized { to: String },
    /// Well-formed reply token with no matching user.
    UnknownRecipient { token: String },
}

pub struct InboundPipeline {
    store: Arc<PersonalizationStore>,
    generator: Arc<dyn ContentGenerator>,
    sender: Arc<dyn OutboundSender>,
    router: AddressRouter,
    formatter: ThreadFormatter,
}

impl InboundPipeline {
    pub fn new(
        store: Arc<PersonalizationStore>,
        generator: Arc<dyn ContentGenerator>,
        sender: Arc<dyn OutboundSender>,
        route_config: RouteConfig,
    ) -> Self {
        Self {
            store,
            generator,
            sender,
            router: AddressRouter::new(route_config.clone()),
            formatter: ThreadFormatter::new(route_config),
        }
    }

    pub fn process(&self, fields: &InboundFields) -> Result<InboundOutcome, ServiceError> {
        let from = required_field(fields.from.as_deref(), "from")?;
        let to = required_field(fields.to.as_deref(), "to")?;
        let parsed = parse_header_blob(fields.headers.as_deref());
        let email = IncomingEmail {
            from,
            to,
            subject: fields.subject.clone().unwrap_or_default(),
            body: fields.text.clone().unwrap_or_default(),
            message_id: parsed.message_id,
            in_reply_to: parsed.in_reply_to,
            references: parsed.references,
            timestamp: Utc::now(),
        };
        info!(
            "inbound delivery {} to {}",
            email.delivery_key(),
            email.to
        );

        match self.router.classify(&email.to) {
            RecipientRoute::Assistant => self.answer_direct(&email),
            RecipientRoute::FeedReply { user_id } => self.record_feedback(&email, &user_id),
            RecipientRoute::Unrecognized => {
                info!("no route for recipient field '{}'", email.to);
                Ok(InboundOutcome::Unrecognized {
                    to: email.to.clone(),
                })
            }
        }
    }

    fn answer_direct(&self, email: &IncomingEmail) -> Result<InboundOutcome, ServiceError> {
        if email.body.trim().is_empty() {
            return Ok(InboundOutcome::NothingToDo {
                reason: "empty message body",
            });
        }

        let generated = self.generator.generate(&GenerateParams {
            profile: ASSISTANT_PROFILE.to_string(),
            context: direct_context(email),
        })?;
        info!(
            "generated direct reply for {} via {} ({} tokens)",
            email.delivery_key(),
            generated.model,
            generated.token_count
        );

        let reply = self.formatter.build_reply(email, &generated.content);
        self.sender.send(&reply)?;
        Ok(InboundOutcome::ReplySent {
            to: reply.to,
            body: reply.body,
        })
    }

    fn record_feedback(
        &self,
        email: &IncomingEmail,
        token: &str,
    ) -> Result<InboundOutcome, ServiceError> {
        let user = match self.store.user_by_id(token) {
            Ok(user) => user,
            Err(StoreError::NotFound(_)) => {
                warn!("reply token '{}' does not resolve to a user", token);
                return Ok(InboundOutcome::UnknownRecipient {
                    token: token.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        // Feedback only counts from the registered address; anything else
        // is dropped without an audit entry.
        if !sender_matches(&email.from, &user.email) {
            warn!(
                "rejecting feedback for user {}: sender does not match registered address",
                user.id
            );
            return Ok(InboundOutcome::NothingToDo {
                reason: "sender does not match the registered address",
            });
        }

        let Some(feedback) = normalize_feedback(&email.body) else {
            return Ok(InboundOutcome::NothingToDo {
                reason: "empty feedback after cleaning",
            });
        };

        self.store.append_customization(&user.id, "reply", &feedback)?;
        let merged = merge_prompt(&user.prompt, &feedback);
        self.store.update_prompt(&user.id, &merged)?;
        info!("recorded feedback for user {}", user.id);
        Ok(InboundOutcome::FeedbackRecorded { user_id: user.id })
    }
}

fn required_field(value: Option<&str>, name: &'static str) -> Result<String, ServiceError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ServiceError::MalformedInput(format!("missing field '{name}'")))
}

fn direct_context(email: &IncomingEmail) -> String {
    if email.subject.trim().is_empty() {
        email.body.clone()
    } else {
        format!("Subject: {}\n\n{}", email.subject.trim(), email.body)
    }
}

fn sender_matches(from_field: &str, registered_email: &str) -> bool {
    extract_addresses(from_field)
        .iter()
        .filter_map(|address| normalize_email(address))
        .any(|address| address == registered_email)
}

/// The accepted feedback becomes part of the standing profile; the audit
/// trail of individual entries lives in the customizations table.
fn merge_prompt(prompt: &str, feedback: &str) -> String {
    if prompt.trim().is_empty() {
        feedback.to_string()
    } else {
        format!("{}\n\n{}", prompt.trim_end(), feedback)
    }
}

/// The single outcome → HTTP status table. Everything that should suppress
/// provider retries is a 200; an unknown reply token is the one 404.
pub fn outcome_status(outcome: &InboundOutcome) -> StatusCode {
    match outcome {
        InboundOutcome::ReplySent { .. }
        | InboundOutcome::FeedbackRecorded { .. }
        | InboundOutcome::NothingToDo { .. }
        | InboundOutcome::Unrecognized { .. } => StatusCode::OK,
        InboundOutcome::UnknownRecipient { .. } => StatusCode::NOT_FOUND,
    }
}
