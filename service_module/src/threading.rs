//! Reply construction.
//!
//! Builds the outbound side of a thread from an inbound email and generated
//! content: swapped endpoints, a single `Re: ` prefix, and a References
//! chain that only ever grows.

use tracing::warn;

use crate::email::{IncomingEmail, OutgoingEmail};
use crate::headers::message_id_key;
use crate::routing::{extract_addresses, RouteConfig};

#[derive(Debug, Clone)]
pub struct ThreadFormatter {
    config: RouteConfig,
}

impl ThreadFormatter {
    pub fn new(config: RouteConfig) -> Self {
        Self { config }
    }

    /// Derive the reply for `incoming` carrying `content`. A missing
    /// inbound Message-ID degrades the threading headers to empty; the
    /// reply itself is never dropped over absent metadata.
    pub fn build_reply(&self, incoming: &IncomingEmail, content: &str) -> OutgoingEmail {
        let (in_reply_to, references) = match incoming.message_id.as_deref() {
            Some(message_id) => (
                Some(message_id.to_string()),
                extend_references(&incoming.references, message_id),
            ),
            None => {
                warn!(
                    "threading degraded for delivery {}: inbound email has no Message-ID",
                    incoming.delivery_key()
                );
                (None, Vec::new())
            }
        };

        OutgoingEmail {
            from: self.reply_from(&incoming.to),
            to: reply_to(&incoming.from),
            subject: reply_subject(&incoming.subject),
            body: content.to_string(),
            in_reply_to,
            references,
        }
    }

    /// Reply from the service mailbox the email was addressed to, so the
    /// user's next reply lands on the same route; fall back to the primary
    /// assistant address when the recipient field carried none of ours.
    fn reply_from(&self, to_field: &str) -> String {
        extract_addresses(to_field)
            .into_iter()
            .find(|address| {
                address
                    .split_once('@')
                    .map(|(_, domain)| domain.eq_ignore_ascii_case(&self.config.service_domain))
                    .unwrap_or(false)
            })
            .unwrap_or_else(|| self.config.primary_assistant_address())
    }
}

fn reply_to(from_field: &str) -> String {
    extract_addresses(from_field)
        .into_iter()
        .next()
        .unwrap_or_else(|| from_field.trim().to_string())
}

/// Add `Re: ` unless the subject already carries exactly that prefix.
pub fn reply_subject(original: &str) -> String {
    let trimmed = original.trim();
    if trimmed.is_empty() {
        "Re: (no subject)".to_string()
    } else if trimmed.starts_with("Re: ") {
        trimmed.to_string()
    } else {
        format!("Re: {}", trimmed)
    }
}

/// The incoming references with the incoming message-id appended, in order,
/// nothing removed. A malformed resend can already carry its own id as the
/// final entry; only that tail duplicate is suppressed.
fn extend_references(references: &[String], message_id: &str) -> Vec<String> {
    let mut extended = references.to_vec();
    let already_last = extended
        .last()
        .map(|last| message_id_key(last) == message_id_key(message_id))
        .unwrap_or(false);
    if !already_last {
        extended.push(message_id.to_string());
    }
    extended
}
